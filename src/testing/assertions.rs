//! Custom assertions for domain-specific testing.
//!
//! Provides expressive assertions over the commands the agent received and
//! the events a run emitted.

use crate::analytics::WorkflowEvent;

/// Assert that the agent received exactly `expected`, in order.
///
/// # Panics
///
/// Panics with both sequences side by side if they differ.
///
/// # Example
///
/// ```rust,ignore
/// assert_command_sequence(&agent.commands(), &["/clear", "/continue", "/validate"]);
/// ```
pub fn assert_command_sequence(actual: &[String], expected: &[&str]) {
    let actual_refs: Vec<&str> = actual.iter().map(String::as_str).collect();
    assert_eq!(
        actual_refs, expected,
        "Unexpected command sequence.\nExpected: {:?}\nActual:   {:?}",
        expected, actual_refs
    );
}

/// Assert that at least one event with the given name was recorded.
///
/// # Panics
///
/// Panics listing the recorded event names if none matches.
pub fn assert_event_recorded(events: &[WorkflowEvent], name: &str) {
    assert!(
        events.iter().any(|event| event.name() == name),
        "Expected a '{}' event, got: {:?}",
        name,
        events.iter().map(WorkflowEvent::name).collect::<Vec<_>>()
    );
}

/// Collect the `(from, to)` pairs of every state transition event.
#[must_use]
pub fn transitions(events: &[WorkflowEvent]) -> Vec<(String, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            WorkflowEvent::StateTransition { from, to } => Some((from.clone(), to.clone())),
            _ => None,
        })
        .collect()
}

/// Assert the sequence of states entered, ignoring where each came from.
///
/// # Panics
///
/// Panics with both sequences if they differ.
pub fn assert_states_visited(events: &[WorkflowEvent], expected: &[&str]) {
    let visited: Vec<String> = transitions(events).into_iter().map(|(_, to)| to).collect();
    let visited_refs: Vec<&str> = visited.iter().map(String::as_str).collect();
    assert_eq!(
        visited_refs, expected,
        "Unexpected state sequence.\nExpected: {:?}\nActual:   {:?}",
        expected, visited_refs
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(from: &str, to: &str) -> WorkflowEvent {
        WorkflowEvent::StateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    #[test]
    fn test_assert_command_sequence_passes() {
        let actual = vec!["/clear".to_string(), "/continue".to_string()];
        assert_command_sequence(&actual, &["/clear", "/continue"]);
    }

    #[test]
    #[should_panic(expected = "Unexpected command sequence")]
    fn test_assert_command_sequence_fails() {
        let actual = vec!["/clear".to_string()];
        assert_command_sequence(&actual, &["/continue"]);
    }

    #[test]
    fn test_assert_event_recorded() {
        let events = vec![WorkflowEvent::MarkerDetected { elapsed_ms: 1 }];
        assert_event_recorded(&events, "marker_detected");
    }

    #[test]
    #[should_panic(expected = "Expected a 'task_abandoned' event")]
    fn test_assert_event_recorded_fails() {
        assert_event_recorded(&[], "task_abandoned");
    }

    #[test]
    fn test_states_visited() {
        let events = vec![
            transition("start", "tdd_cycle"),
            WorkflowEvent::MarkerDetected { elapsed_ms: 3 },
            transition("tdd_cycle", "done"),
        ];
        assert_eq!(transitions(&events).len(), 2);
        assert_states_visited(&events, &["tdd_cycle", "done"]);
    }
}
