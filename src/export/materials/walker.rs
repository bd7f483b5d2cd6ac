//! Resolves shader sockets through reroutes and node groups.
//!
//! A [`Cursor`] is the stack of node trees entered so far. Following a link
//! into a group node pushes the group's tree and continues from its group
//! output; reaching a group input pops back out and continues from the
//! matching socket of the outer group node.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::host::nodes::{Node, NodeTree, types};

const MAX_GROUP_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy)]
struct Frame<'a> {
    tree: &'a NodeTree,
    /// The group node (in the enclosing tree) this frame was entered from.
    group_node: Option<&'a Node>,
}

#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    groups: &'a HashMap<String, NodeTree>,
    stack: Vec<Frame<'a>>,
}

/// The node producing a socket's value.
#[derive(Debug, Clone)]
pub struct Source<'a> {
    pub cursor: Cursor<'a>,
    pub node: &'a Node,
    pub socket: String,
}

#[derive(Debug, Clone)]
pub enum Input<'a> {
    Linked(Source<'a>),
    /// Unlinked socket: its default value, if the node stores one.
    Value(Option<&'a Json>),
}

impl<'a> Input<'a> {
    pub fn is_linked(&self) -> bool {
        matches!(self, Input::Linked(_))
    }
}

impl<'a> Cursor<'a> {
    pub fn new(tree: &'a NodeTree, groups: &'a HashMap<String, NodeTree>) -> Self {
        Self {
            groups,
            stack: vec![Frame {
                tree,
                group_node: None,
            }],
        }
    }

    pub fn tree(&self) -> &'a NodeTree {
        // The root frame is never popped.
        self.stack[self.stack.len() - 1].tree
    }

    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    /// Resolve what feeds `socket` of `node`, where `node` lives in the
    /// cursor's current tree.
    pub fn input(&self, node: &'a Node, socket: &str) -> Input<'a> {
        let mut cursor = self.clone();
        let mut node = node;
        let mut socket = socket.to_string();
        loop {
            let tree = cursor.tree();
            let Some(link) = tree.incoming(&node.name, &socket) else {
                return Input::Value(node.input(&socket));
            };
            let Some(from) = tree.node(&link.from.node) else {
                return Input::Value(node.input(&socket));
            };
            match from.node_type.as_str() {
                types::REROUTE => {
                    node = from;
                    socket = "Input".to_string();
                }
                types::GROUP => {
                    let group_tree = from
                        .param_str("node_tree")
                        .and_then(|name| cursor.groups.get(name));
                    let output = group_tree.and_then(|t| t.output_node(types::GROUP_OUTPUT));
                    let (Some(group_tree), Some(output)) = (group_tree, output) else {
                        return Input::Value(None);
                    };
                    if cursor.stack.len() > MAX_GROUP_DEPTH {
                        return Input::Value(None);
                    }
                    cursor.stack.push(Frame {
                        tree: group_tree,
                        group_node: Some(from),
                    });
                    node = output;
                    socket = link.from.socket.clone();
                }
                types::GROUP_INPUT => {
                    if cursor.stack.len() == 1 {
                        return Input::Value(None);
                    }
                    let Some(frame) = cursor.stack.pop() else {
                        return Input::Value(None);
                    };
                    let Some(group_node) = frame.group_node else {
                        return Input::Value(None);
                    };
                    node = group_node;
                    socket = link.from.socket.clone();
                }
                _ => {
                    return Input::Linked(Source {
                        cursor,
                        node: from,
                        socket: link.from.socket.clone(),
                    });
                }
            }
        }
    }
}
