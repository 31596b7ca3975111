//! PLMXML node types after parsing.
//!
//! Nodes live in a flat arena owned by [`Document`]. Every cross reference is
//! stored twice: the raw whitespace-separated ID list as it appeared in the
//! file, and the resolved [`NodeId`] handles filled in by the resolver.

use std::collections::{BTreeMap, HashMap};

use plmx_math::transform::DMat4Ext;
use plmx_math::DMat4;
use serde::{Serialize, Serializer};

/// Handle of a node inside a [`Document`] arena. Serialized as the arena
/// position, so dumps can point into the `nodes` list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Position in the arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Which variant a node is, without borrowing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    Instance,
    Part,
    GeometryRef,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Instance => write!(f, "Instance"),
            NodeKind::Part => write!(f, "Part"),
            NodeKind::GeometryRef => write!(f, "GeometryRef"),
        }
    }
}

/// A `<Transform>` element: 16 row-major values in meters.
#[derive(Clone, Debug, Serialize)]
pub struct SourceTransform {
    pub id: Option<String>,
    #[serde(serialize_with = "row_major")]
    pub matrix: DMat4,
}

/// Dump matrices in the order they were written in the file.
fn row_major<S: Serializer>(matrix: &DMat4, serializer: S) -> Result<S::Ok, S::Error> {
    matrix.to_row_major().serialize(serializer)
}

/// A single `<UserValue title=".." value=".."/>`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UserValue {
    pub title: String,
    pub value: String,
}

/// A `<UserData>` block.
#[derive(Clone, Debug, Default, Serialize)]
pub struct UserData {
    pub kind: Option<String>,
    pub values: Vec<UserValue>,
}

/// One `<Row>` of a `<TableAttribute>`, keyed by column index.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TableRow {
    pub columns: BTreeMap<u32, String>,
}

impl TableRow {
    /// Value at `col`, empty string if the column is absent.
    pub fn get(&self, col: u32) -> &str {
        self.columns.get(&col).map(String::as_str).unwrap_or("")
    }

    /// True if every column is blank.
    pub fn is_blank(&self) -> bool {
        self.columns.values().all(|v| v.trim().is_empty())
    }
}

/// A `<TableAttribute>`: the column-indexed material table.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MaterialTable {
    pub definition_ref: Option<String>,
    pub rows: Vec<TableRow>,
}

impl MaterialTable {
    /// First row carrying any value.
    pub fn primary_row(&self) -> Option<&TableRow> {
        self.rows.iter().find(|row| !row.is_blank())
    }
}

/// A placed occurrence of a Part.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Instance {
    pub id: String,
    pub name: Option<String>,
    pub part_ref: String,
    pub instance_refs: String,
    pub quantity: u32,
    pub transform: Option<SourceTransform>,
    pub user_data: Vec<UserData>,

    /// Resolved `partRef`.
    pub parts: Vec<NodeId>,
    /// Resolved `instanceRefs`.
    pub children: Vec<NodeId>,
}

/// A named entity referencing geometry and child instances.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Part {
    pub id: String,
    pub name: Option<String>,
    pub representation_refs: String,
    pub instance_refs: String,
    pub user_data: Vec<UserData>,
    pub table: Option<MaterialTable>,

    /// Inline representations followed by resolved `representationRefs`.
    pub representations: Vec<NodeId>,
    /// Resolved `instanceRefs`.
    pub children: Vec<NodeId>,
}

/// Which element a [`GeometryRef`] was read from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometrySource {
    /// The `location` of a `<Representation>` itself.
    #[default]
    Representation,
    /// A `<CompoundRep>` nested in the representation with this ID.
    CompoundRep { representation: Option<String> },
}

/// A reference to an external tessellated-geometry file.
#[derive(Clone, Debug, Default, Serialize)]
pub struct GeometryRef {
    pub id: String,
    pub name: Option<String>,
    pub format: Option<String>,
    pub location: String,
    pub source: GeometrySource,
    pub transform: Option<SourceTransform>,
    pub user_data: Vec<UserData>,
    pub table: Option<MaterialTable>,
}

/// Tagged union of everything the traversal visits.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum GraphNode {
    Instance(Instance),
    Part(Part),
    GeometryRef(GeometryRef),
}

impl GraphNode {
    pub fn id(&self) -> &str {
        match self {
            GraphNode::Instance(i) => &i.id,
            GraphNode::Part(p) => &p.id,
            GraphNode::GeometryRef(g) => &g.id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            GraphNode::Instance(_) => NodeKind::Instance,
            GraphNode::Part(_) => NodeKind::Part,
            GraphNode::GeometryRef(_) => NodeKind::GeometryRef,
        }
    }

    pub fn user_data(&self) -> &[UserData] {
        match self {
            GraphNode::Instance(i) => &i.user_data,
            GraphNode::Part(p) => &p.user_data,
            GraphNode::GeometryRef(g) => &g.user_data,
        }
    }

    /// Flattened `(title, value)` metadata pairs from every UserData block.
    pub fn metadata(&self) -> Vec<(String, String)> {
        self.user_data()
            .iter()
            .flat_map(|ud| ud.values.iter())
            .map(|uv| (uv.title.clone(), uv.value.clone()))
            .collect()
    }

    /// Value of the `Nomenclature` user value, if any.
    pub fn nomenclature(&self) -> Option<&str> {
        self.user_data()
            .iter()
            .flat_map(|ud| ud.values.iter())
            .find(|uv| uv.title == "Nomenclature")
            .map(|uv| uv.value.as_str())
    }
}

/// `<GeneralObject>`: kept so relations can point at it.
#[derive(Clone, Debug, Default, Serialize)]
pub struct GeneralObject {
    pub id: String,
    pub class_name: Option<String>,
    pub user_data: Vec<UserData>,
}

/// Target of a relation's `relatedRefs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelatedRef {
    Node(NodeId),
    General(usize),
}

/// `<Relation>` between objects of the instance graph.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Relation {
    pub id: String,
    pub sub_type: Option<String>,
    pub related_refs: String,
    pub user_data: Vec<UserData>,
    pub related: Vec<RelatedRef>,
}

/// `<Context>` inside the header's `<Contexts>`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Context {
    pub id: String,
    pub ref_config: Option<String>,
}

/// `<Column col=".." value=".."/>` of a table definition.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ColumnDefinition {
    pub col: u32,
    pub value: Option<String>,
}

/// `<TableAttributeDefinition>`: the column layout a `TableAttribute`
/// points at through `definitionRef`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TableAttributeDefinition {
    pub id: String,
    pub columns: Vec<ColumnDefinition>,
}

/// `<Header>` attributes and children.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Header {
    pub author: Option<String>,
    pub creation_date: Option<String>,
    pub definition: Option<String>,
    pub extension_version: Option<String>,
    pub smaragd_version: Option<String>,
    pub user_data: Vec<UserData>,
    pub contexts: Vec<Context>,
    pub definitions: Vec<TableAttributeDefinition>,
}

impl Header {
    pub fn table_definition(&self, id: &str) -> Option<&TableAttributeDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }
}

/// A parsed and resolved PLMXML session.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Document {
    pub author: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub schema_version: Option<f64>,
    pub schema_location: Option<String>,
    pub header: Option<Header>,

    /// Raw `rootRefs` of the instance graph.
    pub root_refs: String,
    /// Resolved `rootRefs`.
    pub roots: Vec<NodeId>,

    pub relations: Vec<Relation>,
    pub general_objects: Vec<GeneralObject>,

    /// References dropped by the resolver.
    pub reference_errors: Vec<super::ReferenceError>,

    pub(crate) nodes: Vec<GraphNode>,
    #[serde(skip)]
    pub(crate) index: HashMap<String, NodeId>,
}

impl Document {
    /// Node behind a handle.
    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id.index()]
    }

    /// Look up a node handle by its document ID.
    pub fn lookup(&self, id: &str) -> Option<NodeId> {
        self.index.get(id).copied()
    }

    pub fn instance(&self, id: NodeId) -> Option<&Instance> {
        match self.nodes.get(id.index()) {
            Some(GraphNode::Instance(i)) => Some(i),
            _ => None,
        }
    }

    pub fn part(&self, id: NodeId) -> Option<&Part> {
        match self.nodes.get(id.index()) {
            Some(GraphNode::Part(p)) => Some(p),
            _ => None,
        }
    }

    pub fn geometry(&self, id: NodeId) -> Option<&GeometryRef> {
        match self.nodes.get(id.index()) {
            Some(GraphNode::GeometryRef(g)) => Some(g),
            _ => None,
        }
    }

    /// All nodes with their handles, in document order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &GraphNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn count(&self, kind: NodeKind) -> usize {
        self.nodes.iter().filter(|n| n.kind() == kind).count()
    }

    /// Number of references dropped during resolution.
    pub fn dangling_refs(&self) -> usize {
        self.reference_errors.len()
    }

    /// Full structured dump of the document as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_row_lookup() {
        let mut row = TableRow::default();
        row.columns.insert(0, "STAHL".to_string());
        row.columns.insert(7, "20MnB4".to_string());

        assert_eq!(row.get(0), "STAHL");
        assert_eq!(row.get(7), "20MnB4");
        assert_eq!(row.get(3), "");
        assert!(!row.is_blank());
    }

    #[test]
    fn test_primary_row_skips_blank_rows() {
        let mut blank = TableRow::default();
        blank.columns.insert(0, "  ".to_string());
        let mut filled = TableRow::default();
        filled.columns.insert(0, "ALU".to_string());

        let table = MaterialTable {
            definition_ref: None,
            rows: vec![blank, filled],
        };

        assert_eq!(table.primary_row().map(|r| r.get(0)), Some("ALU"));
    }

    #[test]
    fn test_nomenclature_lookup() {
        let node = GraphNode::Instance(Instance {
            id: "i1".to_string(),
            user_data: vec![UserData {
                kind: Some("AttributesInContext".to_string()),
                values: vec![
                    UserValue {
                        title: "Owner".to_string(),
                        value: "body".to_string(),
                    },
                    UserValue {
                        title: "Nomenclature".to_string(),
                        value: "BRACKET LH".to_string(),
                    },
                ],
            }],
            ..Default::default()
        });

        assert_eq!(node.nomenclature(), Some("BRACKET LH"));
        assert_eq!(node.metadata().len(), 2);
        assert_eq!(node.kind(), NodeKind::Instance);
    }
}
