//! Second parsing phase: link raw ID lists to arena handles.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;

use super::parser::{ParseError, ParseResult};
use super::types::*;

/// A reference that could not be linked. Recovered: the target is dropped.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceError {
    #[error("{owner}: {attribute} references unknown id '{target}'")]
    Dangling {
        owner: String,
        attribute: &'static str,
        target: String,
    },

    #[error("{owner}: {attribute} references '{target}', a {found} (expected {expected})")]
    WrongKind {
        owner: String,
        attribute: &'static str,
        target: String,
        found: NodeKind,
        expected: String,
    },
}

/// Arena under construction while the parser runs.
#[derive(Default)]
pub(crate) struct DocumentBuilder {
    pub document: Document,
    /// Representation IDs that stand for a list of compound reps.
    pub aliases: HashMap<String, Vec<NodeId>>,
    pub general_index: HashMap<String, usize>,
    seen: HashSet<String>,
    synthetic: usize,
}

impl DocumentBuilder {
    /// Reserve an ID, rejecting duplicates across every kind of object.
    pub fn claim(&mut self, id: &str) -> ParseResult<()> {
        if self.seen.insert(id.to_string()) {
            Ok(())
        } else {
            Err(ParseError::DuplicateId(id.to_string()))
        }
    }

    /// Invent and claim an ID for an element that carries none.
    pub fn synthetic_id(&mut self, owner: &str, kind: &str) -> ParseResult<String> {
        self.synthetic += 1;
        let id = format!("{owner}#{kind}{}", self.synthetic);
        self.claim(&id)?;
        Ok(id)
    }

    pub fn push_node(&mut self, node: GraphNode) -> NodeId {
        let id = NodeId(self.document.nodes.len() as u32);
        self.document.index.insert(node.id().to_string(), id);
        self.document.nodes.push(node);
        id
    }

    /// Resolve every reference attribute into handle lists.
    pub fn resolve(self) -> Document {
        let DocumentBuilder {
            mut document,
            aliases,
            general_index,
            ..
        } = self;

        let kinds: Vec<NodeKind> = document.nodes.iter().map(GraphNode::kind).collect();
        let mut linker = Linker {
            index: &document.index,
            kinds: &kinds,
            aliases: &aliases,
            errors: Vec::new(),
        };

        for node in document.nodes.iter_mut() {
            match node {
                GraphNode::Instance(inst) => {
                    inst.parts = linker.link(&inst.id, "partRef", &inst.part_ref, &[NodeKind::Part]);
                    inst.children = linker.link(
                        &inst.id,
                        "instanceRefs",
                        &inst.instance_refs,
                        &[NodeKind::Instance],
                    );
                }
                GraphNode::Part(part) => {
                    let linked = linker.link(
                        &part.id,
                        "representationRefs",
                        &part.representation_refs,
                        &[NodeKind::GeometryRef],
                    );
                    for id in linked {
                        if !part.representations.contains(&id) {
                            part.representations.push(id);
                        }
                    }
                    part.children = linker.link(
                        &part.id,
                        "instanceRefs",
                        &part.instance_refs,
                        &[NodeKind::Instance],
                    );
                }
                GraphNode::GeometryRef(_) => {}
            }
        }

        document.roots = linker.link(
            "InstanceGraph",
            "rootRefs",
            &document.root_refs,
            &[NodeKind::Instance, NodeKind::Part],
        );

        for relation in document.relations.iter_mut() {
            relation.related = relation
                .related_refs
                .split_whitespace()
                .filter_map(|target| {
                    if let Some(id) = linker.index.get(target) {
                        Some(RelatedRef::Node(*id))
                    } else if let Some(index) = general_index.get(target) {
                        Some(RelatedRef::General(*index))
                    } else {
                        linker.report(ReferenceError::Dangling {
                            owner: relation.id.clone(),
                            attribute: "relatedRefs",
                            target: target.to_string(),
                        });
                        None
                    }
                })
                .collect();
        }

        let errors = linker.errors;
        document.reference_errors = errors;
        document
    }
}

struct Linker<'a> {
    index: &'a HashMap<String, NodeId>,
    kinds: &'a [NodeKind],
    aliases: &'a HashMap<String, Vec<NodeId>>,
    errors: Vec<ReferenceError>,
}

impl Linker<'_> {
    fn report(&mut self, err: ReferenceError) {
        log::warn!("{err}");
        self.errors.push(err);
    }

    /// Resolve a whitespace-separated ID list, dropping what does not fit.
    fn link(&mut self, owner: &str, attribute: &'static str, raw: &str, accept: &[NodeKind]) -> Vec<NodeId> {
        let mut linked = Vec::new();
        for target in raw.split_whitespace() {
            if let Some(&id) = self.index.get(target) {
                let found = self.kinds[id.index()];
                if accept.contains(&found) {
                    linked.push(id);
                } else {
                    self.report(ReferenceError::WrongKind {
                        owner: owner.to_string(),
                        attribute,
                        target: target.to_string(),
                        found,
                        expected: accept
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(" or "),
                    });
                }
            } else if let (Some(reps), true) =
                (self.aliases.get(target), accept.contains(&NodeKind::GeometryRef))
            {
                linked.extend(reps.iter().copied());
            } else {
                self.report(ReferenceError::Dangling {
                    owner: owner.to_string(),
                    attribute,
                    target: target.to_string(),
                });
            }
        }
        linked
    }
}
