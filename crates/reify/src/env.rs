use std::env;
use std::sync::OnceLock;

static REIFY_PARALLEL_COST: OnceLock<bool> = OnceLock::new();
static REIFY_PASS_STATS: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn flag(cell: &OnceLock<bool>, name: &str) -> bool {
    *cell.get_or_init(|| match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

/// Default for `CostAnalysisOptions::parallel`.
pub(crate) fn parallel_cost_enabled() -> bool {
    flag(&REIFY_PARALLEL_COST, "REIFY_PARALLEL_COST")
}

/// Logs one line per pass execution in the pipeline.
pub(crate) fn pass_stats_enabled() -> bool {
    flag(&REIFY_PASS_STATS, "REIFY_PASS_STATS")
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "off", "maybe"] {
            assert!(!parse_bool(value), "{value}");
        }
    }
}
