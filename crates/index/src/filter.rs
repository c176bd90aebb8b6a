use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals { key: String, value: Value },
    AnyOf { key: String, values: Vec<Value> },
}

impl Condition {
    pub fn key(&self) -> &str {
        match self {
            Condition::Equals { key, .. } | Condition::AnyOf { key, .. } => key,
        }
    }

    pub fn matches(&self, payload: &Map<String, Value>) -> bool {
        match self {
            Condition::Equals { key, value } => payload.get(key) == Some(value),
            Condition::AnyOf { key, values } => payload
                .get(key)
                .map(|found| values.contains(found))
                .unwrap_or(false),
        }
    }

    fn to_qdrant(&self) -> Value {
        match self {
            Condition::Equals { key, value } => json!({ "key": key, "match": { "value": value } }),
            Condition::AnyOf { key, values } => json!({ "key": key, "match": { "any": values } }),
        }
    }
}

/// Conjunction of payload conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    must: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.must.push(Condition::Equals {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn any_of<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.must.push(Condition::AnyOf {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.must
    }

    pub fn condition(&self, key: &str) -> Option<&Condition> {
        self.must.iter().find(|c| c.key() == key)
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    pub fn matches(&self, payload: &Map<String, Value>) -> bool {
        self.must.iter().all(|c| c.matches(payload))
    }

    pub fn to_qdrant(&self) -> Option<Value> {
        if self.must.is_empty() {
            return None;
        }
        let must: Vec<Value> = self.must.iter().map(Condition::to_qdrant).collect();
        Some(json!({ "must": must }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn all_conditions_must_hold() {
        let filter = Filter::new()
            .equals("bot_id", "b")
            .any_of("domain", ["aranceles", "becas"]);
        assert!(filter.matches(&payload(json!({"bot_id": "b", "domain": "becas"}))));
        assert!(!filter.matches(&payload(json!({"bot_id": "b", "domain": "faq"}))));
        assert!(!filter.matches(&payload(json!({"domain": "becas"}))));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::new().matches(&Map::new()));
        assert_eq!(Filter::new().to_qdrant(), None);
    }

    #[test]
    fn renders_qdrant_match_clauses() {
        let filter = Filter::new().equals("periodo", "2025").any_of("domain", ["faq"]);
        assert_eq!(
            filter.to_qdrant().unwrap(),
            json!({"must": [
                {"key": "periodo", "match": {"value": "2025"}},
                {"key": "domain", "match": {"any": ["faq"]}}
            ]})
        );
    }
}
