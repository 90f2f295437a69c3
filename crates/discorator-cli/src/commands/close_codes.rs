//! Close-codes command.

use super::load_config;
use discorator_gateway::ClosePolicy;
use std::path::Path;

fn render(policy: &ClosePolicy) -> Vec<String> {
    let mut lines = vec![
        format!("  {:<6} {:<12} {}", "CODE", "RECOVERABLE", "REASON"),
        format!("  {}", "-".repeat(48)),
    ];
    for (code, rule) in policy.rules() {
        let recoverable = if rule.recoverable { "yes" } else { "no" };
        lines.push(format!("  {:<6} {:<12} {}", code, recoverable, rule.reason));
    }
    let unknown = if policy.unknown_is_recoverable() { "yes" } else { "no" };
    lines.push(format!("  {:<6} {:<12} {}", "other", unknown, "Unknown close code"));
    lines
}

/// Print the close-code table, including overrides from the config file.
pub fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let policy = ClosePolicy::from_config(&config.reconnect)?;

    println!("Close-code policy:\n");
    for line in render(&policy) {
        println!("{}", line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_default_table() {
        let lines = render(&ClosePolicy::default());
        assert!(lines.iter().any(|l| l.contains("4004") && l.contains("no")));
        assert!(lines.iter().any(|l| l.contains("4900") && l.contains("yes")));
        assert!(lines.last().unwrap().contains("other"));

        let codes: Vec<u16> = lines
            .iter()
            .filter_map(|l| l.split_whitespace().next()?.parse().ok())
            .collect();
        let mut sorted = codes.clone();
        sorted.sort_unstable();
        assert_eq!(codes, sorted);
    }

    #[test]
    fn test_render_override() {
        let policy = ClosePolicy::default()
            .with_rule(4004, true, "Retry auth")
            .unknown_recoverable(false);
        let lines = render(&policy);
        assert!(lines.iter().any(|l| l.contains("4004") && l.contains("Retry auth")));
        assert!(lines.last().unwrap().contains("no"));
    }
}
