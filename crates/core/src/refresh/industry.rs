/// Maps raw provider industry names onto canonical buckets.
///
/// Rules are checked in order; the first whose needle occurs in the
/// lowercased name wins. Unmatched names pass through unchanged.
#[derive(Debug, Clone)]
pub struct IndustryTable {
    rules: Vec<(String, String)>,
}

impl Default for IndustryTable {
    fn default() -> Self {
        Self::new([
            ("bank", "banking"),
            ("oil", "oil industry"),
            ("drug", "drug industry"),
        ])
    }
}

impl IndustryTable {
    pub fn new<'a>(rules: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|(needle, canonical)| (needle.to_lowercase(), canonical.to_string()))
                .collect(),
        }
    }

    pub fn with_rule(mut self, needle: &str, canonical: &str) -> Self {
        self.rules
            .push((needle.to_lowercase(), canonical.to_string()));
        self
    }

    pub fn canonicalize(&self, industry: &str) -> String {
        let lower = industry.to_lowercase();
        self.rules
            .iter()
            .find(|(needle, _)| lower.contains(needle.as_str()))
            .map(|(_, canonical)| canonical.clone())
            .unwrap_or_else(|| industry.to_string())
    }
}
