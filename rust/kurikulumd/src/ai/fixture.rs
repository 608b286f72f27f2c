use super::{Generator, Task};
use crate::error::{Error, Result};
use serde_json::Value;

/// Answers from canned JSON kept in the `setup.ai.fixtures` object, keyed by
/// task name. An entry may be
/// - a plain response, returned for every call;
/// - `{"byTpId": {...}, "default": ...}`, selected by the objective id of
///   the request;
/// - `{"error": "message"}`, which fails the call.
pub struct FixtureGenerator {
    fixtures: Value,
}

impl FixtureGenerator {
    pub fn new(fixtures: Value) -> Self {
        FixtureGenerator { fixtures }
    }
}

impl Generator for FixtureGenerator {
    fn generate(&self, task: Task, input: &Value) -> Result<Value> {
        let Some(mut entry) = self.fixtures.get(task.as_str()) else {
            return Err(Error::Generator(format!(
                "no fixture for task {}",
                task.as_str()
            )));
        };
        if let Some(by_tp) = entry.get("byTpId").and_then(|v| v.as_object()) {
            let tp_id = input
                .get("objective")
                .and_then(|o| o.get("id"))
                .and_then(|v| v.as_str())
                .unwrap_or("");
            entry = match by_tp.get(tp_id).or_else(|| entry.get("default")) {
                Some(v) => v,
                None => {
                    return Err(Error::Generator(format!(
                        "no {} fixture for objective {}",
                        task.as_str(),
                        tp_id
                    )))
                }
            };
        }
        if let Some(msg) = entry.get("error").and_then(|v| v.as_str()) {
            return Err(Error::Generator(msg.to_string()));
        }
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn selects_by_objective_then_default() {
        let gen = FixtureGenerator::new(json!({
            "rubric": {
                "byTpId": { "tp-1": { "aspects": "one" }, "tp-2": { "error": "kuota habis" } },
                "default": { "aspects": "fallback" }
            }
        }));
        let one = gen
            .generate(Task::Rubric, &json!({ "objective": { "id": "tp-1" } }))
            .expect("tp-1 fixture");
        assert_eq!(one["aspects"], "one");
        let other = gen
            .generate(Task::Rubric, &json!({ "objective": { "id": "tp-7" } }))
            .expect("default fixture");
        assert_eq!(other["aspects"], "fallback");
        assert!(matches!(
            gen.generate(Task::Rubric, &json!({ "objective": { "id": "tp-2" } })),
            Err(Error::Generator(_))
        ));
        assert!(gen.generate(Task::Units, &json!({})).is_err());
    }
}
