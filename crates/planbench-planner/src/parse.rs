//! Planner response parsing.
//!
//! The model must answer with a JSON object whose `executable_plan` is a
//! list of steps, each carrying the action under the space's step key
//! (`action_id` or `action`).

use planbench_types::{Action, ActionSpace, PlannerAction};
use serde_json::Value;
use thiserror::Error;

/// Why a response could not be read at all.
///
/// Out-of-range actions are not errors: they produce
/// [`PlannerAction::Invalid`] or a truncated plan.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed plan: {0}")]
    Structure(String),
}

/// A step action before range validation.
enum Candidate {
    Action(Action),
    OutOfRange,
}

fn read_step(step: &Value, space: &ActionSpace, index: usize) -> Result<Candidate, ParseError> {
    let key = space.step_key();
    let raw = step
        .get(key)
        .ok_or_else(|| ParseError::Structure(format!("step {index} has no `{key}`")))?;

    match space {
        ActionSpace::Discrete { .. } => {
            let id = raw
                .as_i64()
                .ok_or_else(|| ParseError::Structure(format!("step {index}: `{key}` is not an integer")))?;
            Ok(usize::try_from(id)
                .map(|id| Candidate::Action(Action::Index(id)))
                .unwrap_or(Candidate::OutOfRange))
        }
        ActionSpace::Vector { .. } => {
            let items = raw
                .as_array()
                .ok_or_else(|| ParseError::Structure(format!("step {index}: `{key}` is not a list")))?;
            let values = items
                .iter()
                .map(Value::as_i64)
                .collect::<Option<Vec<i64>>>()
                .ok_or_else(|| ParseError::Structure(format!("step {index}: `{key}` holds non-integers")))?;
            Ok(Candidate::Action(Action::Vector(values)))
        }
    }
}

/// Turn raw model output into a [`PlannerAction`].
///
/// * empty plan → [`PlannerAction::Stop`]
/// * first action outside `space` → [`PlannerAction::Invalid`]
/// * a later action outside `space` → plan truncated before it
pub fn json_to_action(output: &str, space: &ActionSpace) -> Result<PlannerAction, ParseError> {
    let value: Value = serde_json::from_str(output)?;
    let plan = value
        .get("executable_plan")
        .and_then(Value::as_array)
        .ok_or_else(|| ParseError::Structure("`executable_plan` is missing or not a list".into()))?;

    let mut candidates = Vec::with_capacity(plan.len());
    for (i, step) in plan.iter().enumerate() {
        candidates.push(read_step(step, space, i)?);
    }
    if candidates.is_empty() {
        return Ok(PlannerAction::Stop);
    }

    let mut actions = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match candidate {
            Candidate::Action(a) if space.contains(&a) => actions.push(a),
            _ => break,
        }
    }
    if actions.is_empty() {
        Ok(PlannerAction::Invalid)
    } else {
        Ok(PlannerAction::Plan(actions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discrete(n: usize) -> ActionSpace {
        ActionSpace::Discrete {
            actions: (0..n).map(|i| format!("skill {i}")).collect(),
        }
    }

    fn plan(ids: &[i64]) -> String {
        let steps: Vec<Value> = ids
            .iter()
            .map(|id| serde_json::json!({"action_id": id, "action_name": "x"}))
            .collect();
        serde_json::json!({"executable_plan": steps}).to_string()
    }

    #[test]
    fn valid_plan_is_returned_in_order() {
        let action = json_to_action(&plan(&[2, 0, 1]), &discrete(3)).unwrap();
        assert_eq!(
            action,
            PlannerAction::Plan(vec![Action::Index(2), Action::Index(0), Action::Index(1)])
        );
    }

    #[test]
    fn invalid_action_at_k_truncates_to_k() {
        for k in 1..4 {
            let mut ids: Vec<i64> = vec![0; 5];
            ids[k] = 99;
            let action = json_to_action(&plan(&ids), &discrete(3)).unwrap();
            match action {
                PlannerAction::Plan(actions) => assert_eq!(actions.len(), k),
                other => panic!("expected plan, got {other:?}"),
            }
        }
    }

    #[test]
    fn invalid_first_action_is_invalid() {
        assert_eq!(json_to_action(&plan(&[3, 0]), &discrete(3)).unwrap(), PlannerAction::Invalid);
        assert_eq!(json_to_action(&plan(&[-1]), &discrete(3)).unwrap(), PlannerAction::Invalid);
    }

    #[test]
    fn negative_later_action_truncates() {
        let action = json_to_action(&plan(&[1, -4, 2]), &discrete(3)).unwrap();
        assert_eq!(action, PlannerAction::Plan(vec![Action::Index(1)]));
    }

    #[test]
    fn empty_plan_is_stop() {
        assert_eq!(json_to_action(&plan(&[]), &discrete(3)).unwrap(), PlannerAction::Stop);
    }

    #[test]
    fn bad_json_and_bad_shape_are_errors() {
        assert!(matches!(json_to_action("{oops", &discrete(3)), Err(ParseError::Json(_))));
        assert!(matches!(
            json_to_action(r#"{"plan": []}"#, &discrete(3)),
            Err(ParseError::Structure(_))
        ));
        assert!(matches!(
            json_to_action(r#"{"executable_plan": [{"action_name": "x"}]}"#, &discrete(3)),
            Err(ParseError::Structure(_))
        ));
    }

    #[test]
    fn vector_actions_check_length() {
        let space = ActionSpace::Vector { dims: 7 };
        let out = r#"{"executable_plan": [
            {"action": [50, 50, 20, 0, 60, 0, 1]},
            {"action": [50, 50, 20]},
            {"action": [50, 50, 40, 0, 60, 0, 0]}
        ]}"#;
        let action = json_to_action(out, &space).unwrap();
        assert_eq!(
            action,
            PlannerAction::Plan(vec![Action::Vector(vec![50, 50, 20, 0, 60, 0, 1])])
        );

        let bad = r#"{"executable_plan": [{"action": "up"}]}"#;
        assert!(matches!(json_to_action(bad, &space), Err(ParseError::Structure(_))));
    }
}
