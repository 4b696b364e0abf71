use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::engine::condition::FilterGroup;

/// One node in an automation's action tree. Siblings execute in ascending
/// `order`; duplicate orders within one sibling scope are rejected at
/// write time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionNode {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub order: i32,
    #[serde(flatten)]
    pub kind: ActionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    Conditional {
        condition: FilterGroup,
        #[serde(default)]
        then_actions: Vec<ActionNode>,
        #[serde(default)]
        else_actions: Vec<ActionNode>,
    },
    Loop {
        /// Template expression resolving to an ordered list of records.
        records: String,
        #[serde(default)]
        actions: Vec<ActionNode>,
    },
    Delay {
        seconds: u64,
    },
    CreateRecord {
        table_id: Uuid,
        fields: Map<String, Value>,
    },
    UpdateRecord {
        table_id: Uuid,
        record_id: String,
        fields: Map<String, Value>,
    },
    DeleteRecord {
        table_id: Uuid,
        record_id: String,
    },
    SendEmail {
        to: String,
        #[serde(default)]
        subject: String,
        #[serde(default)]
        body: String,
    },
    SendSlackMessage {
        webhook_url: String,
        message: String,
    },
    SendWebhook {
        url: String,
        #[serde(default = "default_webhook_method")]
        method: String,
        #[serde(default)]
        headers: Map<String, Value>,
        #[serde(default)]
        body: Value,
    },
    LinkRecords {
        table_id: Uuid,
        record_id: String,
        field_id: String,
        target_record_id: String,
    },
    UnlinkRecords {
        table_id: Uuid,
        record_id: String,
        field_id: String,
        target_record_id: String,
    },
    RunScript {
        language: String,
        script: String,
        #[serde(default)]
        input: Value,
    },
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

impl ActionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ActionKind::Conditional { .. } => "conditional",
            ActionKind::Loop { .. } => "loop",
            ActionKind::Delay { .. } => "delay",
            ActionKind::CreateRecord { .. } => "create_record",
            ActionKind::UpdateRecord { .. } => "update_record",
            ActionKind::DeleteRecord { .. } => "delete_record",
            ActionKind::SendEmail { .. } => "send_email",
            ActionKind::SendSlackMessage { .. } => "send_slack_message",
            ActionKind::SendWebhook { .. } => "send_webhook",
            ActionKind::LinkRecords { .. } => "link_records",
            ActionKind::UnlinkRecords { .. } => "unlink_records",
            ActionKind::RunScript { .. } => "run_script",
        }
    }

    fn child_lists_mut(&mut self) -> Vec<&mut Vec<ActionNode>> {
        match self {
            ActionKind::Conditional {
                then_actions,
                else_actions,
                ..
            } => vec![then_actions, else_actions],
            ActionKind::Loop { actions, .. } => vec![actions],
            _ => vec![],
        }
    }

    fn child_lists(&self) -> Vec<&Vec<ActionNode>> {
        match self {
            ActionKind::Conditional {
                then_actions,
                else_actions,
                ..
            } => vec![then_actions, else_actions],
            ActionKind::Loop { actions, .. } => vec![actions],
            _ => vec![],
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionTreeError {
    #[error("duplicate order {order} among sibling actions")]
    DuplicateOrder { order: i32 },
    #[error("duplicate action id {id}")]
    DuplicateId { id: Uuid },
    #[error("action {id} not found")]
    NotFound { id: Uuid },
    #[error("unknown branch `{branch}` for parent action")]
    UnknownBranch { branch: String },
}

/// Validates sibling-order uniqueness and id uniqueness across the tree.
pub fn validate_tree(actions: &[ActionNode]) -> Result<(), ActionTreeError> {
    let mut seen_ids = std::collections::HashSet::new();
    validate_level(actions, &mut seen_ids)
}

fn validate_level(
    actions: &[ActionNode],
    seen_ids: &mut std::collections::HashSet<Uuid>,
) -> Result<(), ActionTreeError> {
    let mut seen_orders = std::collections::HashSet::new();
    for node in actions {
        if !seen_orders.insert(node.order) {
            return Err(ActionTreeError::DuplicateOrder { order: node.order });
        }
        if !seen_ids.insert(node.id) {
            return Err(ActionTreeError::DuplicateId { id: node.id });
        }
        for child_list in node.kind.child_lists() {
            validate_level(child_list, seen_ids)?;
        }
    }
    Ok(())
}

/// Sorts every sibling list by `order`, recursively. The executor relies
/// on this ordering.
pub fn sort_tree(actions: &mut [ActionNode]) {
    actions.sort_by_key(|a| a.order);
    for node in actions.iter_mut() {
        for child_list in node.kind.child_lists_mut() {
            sort_tree(child_list);
        }
    }
}

/// Inserts `node` either at the root level or into a branch of `parent_id`
/// (`then`, `else`, or `body` for loops).
pub fn insert_action(
    actions: &mut Vec<ActionNode>,
    parent_id: Option<Uuid>,
    branch: Option<&str>,
    node: ActionNode,
) -> Result<(), ActionTreeError> {
    match parent_id {
        None => {
            actions.push(node);
            Ok(())
        }
        Some(pid) => {
            let parent =
                find_node_mut(actions, pid).ok_or(ActionTreeError::NotFound { id: pid })?;
            let branch = branch.unwrap_or("body");
            let target = match (&mut parent.kind, branch) {
                (ActionKind::Conditional { then_actions, .. }, "then") => then_actions,
                (ActionKind::Conditional { else_actions, .. }, "else") => else_actions,
                (ActionKind::Loop { actions, .. }, "body") => actions,
                _ => {
                    return Err(ActionTreeError::UnknownBranch {
                        branch: branch.to_string(),
                    })
                }
            };
            target.push(node);
            Ok(())
        }
    }
}

pub fn find_node_mut(actions: &mut [ActionNode], id: Uuid) -> Option<&mut ActionNode> {
    for node in actions.iter_mut() {
        if node.id == id {
            return Some(node);
        }
        for child_list in node.kind.child_lists_mut() {
            if let Some(found) = find_node_mut(child_list, id) {
                return Some(found);
            }
        }
    }
    None
}

/// Removes the node with `id` (and its subtree) from wherever it lives.
pub fn remove_node(actions: &mut Vec<ActionNode>, id: Uuid) -> Option<ActionNode> {
    if let Some(pos) = actions.iter().position(|a| a.id == id) {
        return Some(actions.remove(pos));
    }
    for node in actions.iter_mut() {
        for child_list in node.kind.child_lists_mut() {
            if let Some(removed) = remove_node(child_list, id) {
                return Some(removed);
            }
        }
    }
    None
}

/// Applies new orders to the sibling scope containing the referenced
/// actions. Every id must live in the same sibling list; ties are
/// rejected, never silently resolved.
pub fn reorder_siblings(
    actions: &mut Vec<ActionNode>,
    orders: &[(Uuid, i32)],
) -> Result<(), ActionTreeError> {
    let Some((first_id, _)) = orders.first() else {
        return Ok(());
    };
    let scope = find_sibling_scope(actions, *first_id)
        .ok_or(ActionTreeError::NotFound { id: *first_id })?;
    for (id, order) in orders {
        let node = scope
            .iter_mut()
            .find(|a| a.id == *id)
            .ok_or(ActionTreeError::NotFound { id: *id })?;
        node.order = *order;
    }
    let mut seen = std::collections::HashSet::new();
    for node in scope.iter() {
        if !seen.insert(node.order) {
            return Err(ActionTreeError::DuplicateOrder { order: node.order });
        }
    }
    scope.sort_by_key(|a| a.order);
    Ok(())
}

fn find_sibling_scope(actions: &mut Vec<ActionNode>, id: Uuid) -> Option<&mut Vec<ActionNode>> {
    if actions.iter().any(|a| a.id == id) {
        return Some(actions);
    }
    for node in actions.iter_mut() {
        for child_list in node.kind.child_lists_mut() {
            if let Some(found) = find_sibling_scope(child_list, id) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delay(order: i32, seconds: u64) -> ActionNode {
        ActionNode {
            id: Uuid::new_v4(),
            order,
            kind: ActionKind::Delay { seconds },
        }
    }

    #[test]
    fn tagged_tree_round_trips() {
        let raw = json!([
            {
                "id": Uuid::new_v4(),
                "order": 0,
                "type": "conditional",
                "condition": {"conjunction": "and", "conditions": []},
                "then_actions": [
                    {"id": Uuid::new_v4(), "order": 0, "type": "delay", "seconds": 5}
                ]
            },
            {
                "id": Uuid::new_v4(),
                "order": 1,
                "type": "send_email",
                "to": "{{trigger.record.Email}}",
                "subject": "hi",
                "body": "there"
            }
        ]);
        let tree: Vec<ActionNode> = serde_json::from_value(raw).expect("tree should parse");
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].kind.type_name(), "conditional");
        assert_eq!(tree[1].kind.type_name(), "send_email");
    }

    #[test]
    fn duplicate_sibling_order_is_rejected() {
        let tree = vec![delay(1, 1), delay(1, 2)];
        assert_eq!(
            validate_tree(&tree),
            Err(ActionTreeError::DuplicateOrder { order: 1 })
        );
    }

    #[test]
    fn same_order_in_different_scopes_is_allowed() {
        let tree = vec![
            ActionNode {
                id: Uuid::new_v4(),
                order: 0,
                kind: ActionKind::Loop {
                    records: "{{trigger.record.Items}}".into(),
                    actions: vec![delay(0, 1)],
                },
            },
            delay(1, 1),
        ];
        assert!(validate_tree(&tree).is_ok());
    }

    #[test]
    fn reorder_rejects_ties() {
        let a = delay(0, 1);
        let b = delay(1, 1);
        let (a_id, b_id) = (a.id, b.id);
        let mut tree = vec![a, b];
        let err = reorder_siblings(&mut tree, &[(a_id, 2), (b_id, 2)]).unwrap_err();
        assert_eq!(err, ActionTreeError::DuplicateOrder { order: 2 });
    }

    #[test]
    fn reorder_applies_and_sorts() {
        let a = delay(0, 1);
        let b = delay(1, 2);
        let (a_id, b_id) = (a.id, b.id);
        let mut tree = vec![a, b];
        reorder_siblings(&mut tree, &[(a_id, 5), (b_id, 2)]).expect("reorder should apply");
        assert_eq!(tree[0].id, b_id);
        assert_eq!(tree[1].id, a_id);
    }

    #[test]
    fn insert_into_conditional_branch() {
        let parent = ActionNode {
            id: Uuid::new_v4(),
            order: 0,
            kind: ActionKind::Conditional {
                condition: FilterGroup {
                    conjunction: crate::engine::condition::Conjunction::And,
                    conditions: vec![],
                },
                then_actions: vec![],
                else_actions: vec![],
            },
        };
        let parent_id = parent.id;
        let mut tree = vec![parent];
        insert_action(&mut tree, Some(parent_id), Some("then"), delay(0, 3))
            .expect("insert should succeed");
        match &tree[0].kind {
            ActionKind::Conditional { then_actions, .. } => assert_eq!(then_actions.len(), 1),
            _ => panic!("expected conditional"),
        }
        let err = insert_action(&mut tree, Some(parent_id), Some("body"), delay(1, 3)).unwrap_err();
        assert!(matches!(err, ActionTreeError::UnknownBranch { .. }));
    }

    #[test]
    fn remove_node_deletes_subtree() {
        let child = delay(0, 1);
        let child_id = child.id;
        let parent = ActionNode {
            id: Uuid::new_v4(),
            order: 0,
            kind: ActionKind::Loop {
                records: "{{trigger.record.Items}}".into(),
                actions: vec![child],
            },
        };
        let parent_id = parent.id;
        let mut tree = vec![parent];
        assert!(remove_node(&mut tree, child_id).is_some());
        assert!(remove_node(&mut tree, parent_id).is_some());
        assert!(tree.is_empty());
    }
}
