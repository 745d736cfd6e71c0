// Copyright (c) 2026, The devcoord Authors.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
// 1. Redistributions of source code must retain the above copyright
//    notice, this list of conditions and the following disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright
//    notice, this list of conditions and the following disclaimer in the
//    documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its
//    contributors may be used to endorse or promote products derived
//    from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! An in-memory device filesystem: enough of a tree to publish and
//! unpublish nodes against. The real filesystem lives elsewhere; the
//! coordinator only ever talks through the `Devfs` trait.

use devcoord_api::{Devfs, Error, NodeId, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct Node {
    #[cfg_attr(not(test), allow(dead_code))]
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

struct Inner {
    nodes: HashMap<NodeId, Node>,
    next: u64,
}

const ROOT: NodeId = NodeId(1);

/// Cloning yields another handle onto the same tree, so a test or an
/// embedding service can observe what the coordinator published.
#[derive(Clone)]
pub struct MemDevfs {
    inner: Arc<Mutex<Inner>>,
}

impl MemDevfs {
    pub fn new() -> MemDevfs {
        let mut nodes = HashMap::new();

        nodes.insert(
            ROOT,
            Node {
                name: String::new(),
                parent: None,
                children: vec![],
            },
        );
        MemDevfs {
            inner: Arc::new(Mutex::new(Inner { nodes, next: 2 })),
        }
    }

    /// Looks a child up by name under `parent`.
    #[cfg(test)]
    pub fn find(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let inner = self.inner.lock().unwrap();

        inner
            .nodes
            .get(&parent)?
            .children
            .iter()
            .find(|id| {
                inner.nodes.get(id).map_or(false, |node| node.name == name)
            })
            .copied()
    }

    #[cfg(test)]
    pub fn node_count(&self) -> usize {
        self.inner.lock().unwrap().nodes.len()
    }
}

impl Default for MemDevfs {
    fn default() -> Self {
        MemDevfs::new()
    }
}

impl Devfs for MemDevfs {
    fn root(&self) -> NodeId {
        ROOT
    }

    fn publish(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.nodes.contains_key(&parent) {
            return Err(Error::BadState);
        }

        let id = NodeId(inner.next);

        inner.next += 1;
        inner.nodes.insert(
            id,
            Node {
                name: String::from(name),
                parent: Some(parent),
                children: vec![],
            },
        );
        if let Some(pnode) = inner.nodes.get_mut(&parent) {
            pnode.children.push(id);
        }
        Ok(id)
    }

    fn unpublish(&mut self, node: NodeId) {
        let mut inner = self.inner.lock().unwrap();

        let Some(gone) = inner.nodes.remove(&node) else {
            return;
        };

        if let Some(pnode) =
            gone.parent.and_then(|p| inner.nodes.get_mut(&p))
        {
            pnode.children.retain(|child| *child != node);
        }

        // Anything still hanging under the node goes with it.
        let mut stack = gone.children;

        while let Some(id) = stack.pop() {
            if let Some(node) = inner.nodes.remove(&id) {
                stack.extend(node.children);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_find() {
        let mut fs = MemDevfs::new();
        let root = fs.root();
        let misc = fs.publish(root, "misc").unwrap();
        let dev = fs.publish(misc, "console").unwrap();

        assert_eq!(fs.find(root, "misc"), Some(misc));
        assert_eq!(fs.find(misc, "console"), Some(dev));
        assert_eq!(fs.find(root, "console"), None);
    }

    #[test]
    fn test_publish_under_missing_parent() {
        let mut fs = MemDevfs::new();

        assert_eq!(fs.publish(NodeId(99), "x"), Err(Error::BadState));
    }

    #[test]
    fn test_unpublish_is_idempotent() {
        let mut fs = MemDevfs::new();
        let root = fs.root();
        let node = fs.publish(root, "gone").unwrap();

        fs.unpublish(node);
        assert_eq!(fs.find(root, "gone"), None);
        assert_eq!(fs.node_count(), 1);

        // The second unpublish is a no-op after the first.

        fs.unpublish(node);
        assert_eq!(fs.node_count(), 1);
    }

    #[test]
    fn test_unpublish_takes_subtree() {
        let mut fs = MemDevfs::new();
        let root = fs.root();
        let bus = fs.publish(root, "bus").unwrap();
        let _leaf = fs.publish(bus, "leaf").unwrap();

        fs.unpublish(bus);
        assert_eq!(fs.node_count(), 1);
    }
}
