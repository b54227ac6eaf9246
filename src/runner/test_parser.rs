use regex::Regex;

/// Extracts failing test names and a short summary from free-form test
/// output. Best effort: unmatchable output yields an empty list.
pub fn parse_test_output(output: &str) -> (String, Vec<String>) {
    let fail_re = Regex::new(r"(?i)(FAIL|Error|ERROR):?\s+([A-Za-z0-9_./-]+)").unwrap();
    let mut names = Vec::new();
    for line in output.lines() {
        if let Some(caps) = fail_re.captures(line) {
            if let Some(name) = caps.get(2) {
                names.push(name.as_str().trim().to_string());
            }
        }
    }
    let failing = unique(names);
    let summary = if failing.is_empty() {
        String::new()
    } else {
        format!("Failing tests: {}", failing.join(", "))
    };
    (summary, failing)
}

fn unique(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}
