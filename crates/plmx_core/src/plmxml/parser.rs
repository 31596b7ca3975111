//! PLMXML document parser.
//!
//! Pull-parses the XML with `quick-xml` and builds the node arena in a single
//! pass. References are kept as raw ID lists here; [`DocumentBuilder::resolve`]
//! links them once the whole file has been read, so forward references are fine.
//!
//! # Recognised elements
//!
//! - `PLMXML` › `Header`, `ProductDef` › `InstanceGraph`
//! - `Header` › `UserData`, `Contexts` › `Context`, `Definitions` › `TableAttributeDefinition` › `Column`
//! - `InstanceGraph` › `Instance`, `Part`, `Relation`, `GeneralObject`, `Representation`
//! - `Part` › `Representation` › `CompoundRep`
//! - `Transform`, `UserData` › `UserValue`, `TableAttribute` › `Row` › `Column`
//!
//! Namespace prefixes are ignored. Anything else is skipped.

use std::collections::HashMap;
use std::io::BufRead;
use std::str::FromStr;

use plmx_math::transform::from_row_major;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use super::resolver::DocumentBuilder;
use super::types::*;

/// Errors that make a PLMXML document unusable.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error at byte {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("Document has no <PLMXML> root element")]
    MissingRoot,

    #[error("Unexpected end of file inside <{0}>")]
    UnexpectedEof(String),

    #[error("Malformed attribute on <{element}>: {message}")]
    MalformedAttribute { element: String, message: String },

    #[error("Missing attribute '{attribute}' on <{element}>")]
    MissingAttribute {
        element: String,
        attribute: &'static str,
    },

    #[error("Invalid value '{value}' for '{attribute}' on <{element}>")]
    InvalidAttribute {
        element: String,
        attribute: &'static str,
        value: String,
    },

    #[error("Transform '{id}' must hold 16 numbers: {message}")]
    InvalidTransform { id: String, message: String },

    #[error("Duplicate id '{0}'")]
    DuplicateId(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Parse PLMXML text into a resolved [`Document`].
pub fn parse_plmxml(content: &str) -> ParseResult<Document> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut builder = DocumentBuilder::default();
    parse_root(&mut reader, &mut builder)?;

    let document = builder.resolve();
    log::debug!(
        "Parsed PLMXML: {} instances, {} parts, {} geometry refs, {} roots",
        document.count(NodeKind::Instance),
        document.count(NodeKind::Part),
        document.count(NodeKind::GeometryRef),
        document.roots.len()
    );
    Ok(document)
}

/// Read and parse a PLMXML file.
pub fn parse_plmxml_file(path: &std::path::Path) -> ParseResult<Document> {
    let content = std::fs::read_to_string(path)?;
    parse_plmxml(&content)
}

/// A child event with the borrow on the read buffer released.
enum Child {
    Start(BytesStart<'static>),
    Empty(BytesStart<'static>),
    Text(String),
    End,
}

fn xml_error<R>(reader: &Reader<R>, err: quick_xml::Error) -> ParseError {
    ParseError::Xml {
        position: reader.buffer_position() as u64,
        message: err.to_string(),
    }
}

fn next_child<R: BufRead>(reader: &mut Reader<R>, parent: &str) -> ParseResult<Child> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => return Ok(Child::Start(e.into_owned())),
            Ok(Event::Empty(e)) => return Ok(Child::Empty(e.into_owned())),
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|err| xml_error(reader, err))?;
                return Ok(Child::Text(text.into_owned()));
            }
            Ok(Event::End(_)) => return Ok(Child::End),
            Ok(Event::Eof) => return Err(ParseError::UnexpectedEof(parent.to_string())),
            // Comments, processing instructions, CDATA
            Ok(_) => {}
            Err(err) => return Err(xml_error(reader, err)),
        }
    }
}

/// Skip the rest of an element whose start tag was just read.
fn skip_element<R: BufRead>(reader: &mut Reader<R>, name: &str) -> ParseResult<()> {
    let mut depth = 1usize;
    loop {
        match next_child(reader, name)? {
            Child::Start(_) => depth += 1,
            Child::End => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Child::Empty(_) | Child::Text(_) => {}
        }
    }
}

/// Visit the children of an element.
///
/// `on_child` returns `false` for elements it does not handle; those are
/// skipped. Returns the concatenated text content.
fn children<R, F>(
    reader: &mut Reader<R>,
    parent: &str,
    has_body: bool,
    mut on_child: F,
) -> ParseResult<String>
where
    R: BufRead,
    F: FnMut(&mut Reader<R>, &BytesStart<'static>, bool) -> ParseResult<bool>,
{
    let mut text = String::new();
    if !has_body {
        return Ok(text);
    }

    loop {
        match next_child(reader, parent)? {
            Child::Start(e) => {
                if !on_child(reader, &e, true)? {
                    skip_element(reader, parent)?;
                }
            }
            Child::Empty(e) => {
                on_child(reader, &e, false)?;
            }
            Child::Text(t) => {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(&t);
            }
            Child::End => return Ok(text),
        }
    }
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Attributes of one element keyed by local name.
struct Attrs {
    element: String,
    values: HashMap<String, String>,
}

impl Attrs {
    fn read(e: &BytesStart) -> ParseResult<Self> {
        let element = local_name(e);
        let mut values = HashMap::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| ParseError::MalformedAttribute {
                element: element.clone(),
                message: err.to_string(),
            })?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| ParseError::MalformedAttribute {
                    element: element.clone(),
                    message: err.to_string(),
                })?;
            values.insert(key, value.into_owned());
        }
        Ok(Self { element, values })
    }

    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }

    /// Attribute value, or empty when absent.
    fn text(&self, name: &str) -> String {
        self.get(name).unwrap_or_default()
    }

    fn required(&self, name: &'static str) -> ParseResult<String> {
        match self.values.get(name) {
            Some(v) if !v.trim().is_empty() => Ok(v.clone()),
            _ => Err(ParseError::MissingAttribute {
                element: self.element.clone(),
                attribute: name,
            }),
        }
    }

    fn parse<T: FromStr>(&self, name: &'static str) -> ParseResult<Option<T>> {
        match self.values.get(name) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ParseError::InvalidAttribute {
                    element: self.element.clone(),
                    attribute: name,
                    value: raw.clone(),
                }),
        }
    }
}

fn parse_root<R: BufRead>(reader: &mut Reader<R>, builder: &mut DocumentBuilder) -> ParseResult<()> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let (start, has_body) = match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => (e.into_owned(), true),
            Ok(Event::Empty(e)) => (e.into_owned(), false),
            Ok(Event::Eof) => return Err(ParseError::MissingRoot),
            Ok(_) => continue,
            Err(err) => return Err(xml_error(reader, err)),
        };

        if start.local_name().as_ref() != b"PLMXML" {
            return Err(ParseError::MissingRoot);
        }

        let attrs = Attrs::read(&start)?;
        builder.document.author = attrs.get("author");
        builder.document.date = attrs.get("date");
        builder.document.time = attrs.get("time");
        builder.document.schema_version = attrs.parse("schemaVersion")?;
        builder.document.schema_location = attrs.get("schemaLocation");

        children(reader, "PLMXML", has_body, |reader, e, body| {
            match e.local_name().as_ref() {
                b"Header" => {
                    builder.document.header = Some(parse_header(reader, e, body)?);
                    Ok(true)
                }
                b"ProductDef" => {
                    children(reader, "ProductDef", body, |reader, e, body| {
                        if e.local_name().as_ref() == b"InstanceGraph" {
                            parse_instance_graph(reader, e, body, builder)?;
                            Ok(true)
                        } else {
                            Ok(false)
                        }
                    })?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })?;
        return Ok(());
    }
}

fn parse_header<R: BufRead>(reader: &mut Reader<R>, e: &BytesStart, body: bool) -> ParseResult<Header> {
    let attrs = Attrs::read(e)?;
    let mut header = Header {
        author: attrs.get("author"),
        creation_date: attrs.get("creationDate"),
        definition: attrs.get("definition"),
        extension_version: attrs.get("extensionVersion"),
        smaragd_version: attrs.get("smaragdVersion"),
        ..Default::default()
    };

    children(reader, "Header", body, |reader, e, body| {
        match e.local_name().as_ref() {
            b"UserData" => header.user_data.push(parse_user_data(reader, e, body)?),
            b"Contexts" => {
                children(reader, "Contexts", body, |_, e, body| {
                    if e.local_name().as_ref() != b"Context" {
                        return Ok(false);
                    }
                    let attrs = Attrs::read(e)?;
                    header.contexts.push(Context {
                        id: attrs.text("id"),
                        ref_config: attrs.get("refConfig"),
                    });
                    Ok(!body)
                })?;
            }
            b"Definitions" => {
                children(reader, "Definitions", body, |reader, e, body| {
                    if e.local_name().as_ref() != b"TableAttributeDefinition" {
                        return Ok(false);
                    }
                    header.definitions.push(parse_table_definition(reader, e, body)?);
                    Ok(true)
                })?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    })?;

    Ok(header)
}

fn parse_table_definition<R: BufRead>(
    reader: &mut Reader<R>,
    e: &BytesStart,
    body: bool,
) -> ParseResult<TableAttributeDefinition> {
    let attrs = Attrs::read(e)?;
    let mut definition = TableAttributeDefinition {
        id: attrs.text("id"),
        columns: Vec::new(),
    };

    children(reader, "TableAttributeDefinition", body, |_, e, body| {
        if e.local_name().as_ref() != b"Column" {
            return Ok(false);
        }
        let attrs = Attrs::read(e)?;
        definition.columns.push(ColumnDefinition {
            col: attrs.parse("col")?.unwrap_or_default(),
            value: attrs.get("value"),
        });
        Ok(!body)
    })?;

    Ok(definition)
}

fn parse_instance_graph<R: BufRead>(
    reader: &mut Reader<R>,
    e: &BytesStart,
    body: bool,
    builder: &mut DocumentBuilder,
) -> ParseResult<()> {
    let attrs = Attrs::read(e)?;
    builder.document.root_refs = attrs.text("rootRefs");

    children(reader, "InstanceGraph", body, |reader, e, body| {
        match e.local_name().as_ref() {
            b"Instance" => parse_instance(reader, e, body, builder)?,
            b"Part" | b"ProductRevisionView" => parse_part(reader, e, body, builder)?,
            b"Representation" => {
                parse_representation(reader, e, body, builder, "InstanceGraph")?;
            }
            b"Relation" => parse_relation(reader, e, body, builder)?,
            b"GeneralObject" => parse_general_object(reader, e, body, builder)?,
            _ => return Ok(false),
        }
        Ok(true)
    })?;

    Ok(())
}

fn parse_instance<R: BufRead>(
    reader: &mut Reader<R>,
    e: &BytesStart,
    body: bool,
    builder: &mut DocumentBuilder,
) -> ParseResult<()> {
    let attrs = Attrs::read(e)?;
    let id = attrs.required("id")?;
    builder.claim(&id)?;

    let mut instance = Instance {
        name: attrs.get("name"),
        part_ref: attrs.text("partRef"),
        instance_refs: attrs.text("instanceRefs"),
        quantity: attrs.parse("quantity")?.unwrap_or(1),
        id,
        ..Default::default()
    };

    children(reader, "Instance", body, |reader, e, body| {
        match e.local_name().as_ref() {
            b"Transform" => instance.transform = Some(parse_transform(reader, e, body)?),
            b"UserData" => instance.user_data.push(parse_user_data(reader, e, body)?),
            _ => return Ok(false),
        }
        Ok(true)
    })?;

    builder.push_node(GraphNode::Instance(instance));
    Ok(())
}

fn parse_part<R: BufRead>(
    reader: &mut Reader<R>,
    e: &BytesStart,
    body: bool,
    builder: &mut DocumentBuilder,
) -> ParseResult<()> {
    let attrs = Attrs::read(e)?;
    let id = attrs.required("id")?;
    builder.claim(&id)?;

    let mut part = Part {
        name: attrs.get("name"),
        representation_refs: attrs.text("representationRefs"),
        instance_refs: attrs.text("instanceRefs"),
        id,
        ..Default::default()
    };

    children(reader, "Part", body, |reader, e, body| {
        match e.local_name().as_ref() {
            b"Representation" => {
                let reps = parse_representation(reader, e, body, builder, &part.id)?;
                part.representations.extend(reps);
            }
            b"UserData" => part.user_data.push(parse_user_data(reader, e, body)?),
            b"TableAttribute" => part.table = Some(parse_table(reader, e, body)?),
            _ => return Ok(false),
        }
        Ok(true)
    })?;

    builder.push_node(GraphNode::Part(part));
    Ok(())
}

/// Parse a `<Representation>` and return the geometry nodes it contributes.
///
/// A representation with its own `location` is a geometry reference; each
/// nested `<CompoundRep>` is another one. An ID on a representation without a
/// location becomes an alias for its compound reps.
fn parse_representation<R: BufRead>(
    reader: &mut Reader<R>,
    e: &BytesStart,
    body: bool,
    builder: &mut DocumentBuilder,
    owner: &str,
) -> ParseResult<Vec<NodeId>> {
    let attrs = Attrs::read(e)?;
    let id = attrs.get("id").filter(|id| !id.trim().is_empty());
    if let Some(id) = &id {
        builder.claim(id)?;
    }

    let mut own = GeometryRef {
        name: attrs.get("name"),
        format: attrs.get("format"),
        location: attrs.text("location"),
        ..Default::default()
    };
    let own_id = if own.location.trim().is_empty() {
        None
    } else {
        match &id {
            Some(id) => Some(id.clone()),
            None => Some(builder.synthetic_id(owner, "rep")?),
        }
    };
    // Compound reps remember the representation they sit in.
    let group = own_id.clone().or_else(|| id.clone());
    let mut compound = Vec::new();

    children(reader, "Representation", body, |reader, e, body| {
        match e.local_name().as_ref() {
            b"CompoundRep" => {
                compound.push(parse_compound_rep(reader, e, body, builder, owner, group.as_deref())?);
            }
            b"Transform" => own.transform = Some(parse_transform(reader, e, body)?),
            b"UserData" => own.user_data.push(parse_user_data(reader, e, body)?),
            b"TableAttribute" => own.table = Some(parse_table(reader, e, body)?),
            _ => return Ok(false),
        }
        Ok(true)
    })?;

    let mut nodes = Vec::with_capacity(compound.len() + 1);
    match own_id {
        Some(own_id) => {
            own.id = own_id;
            nodes.push(builder.push_node(GraphNode::GeometryRef(own)));
        }
        None => {
            if let Some(id) = id {
                builder.aliases.insert(id, compound.clone());
            }
        }
    }
    nodes.extend(compound);
    Ok(nodes)
}

fn parse_compound_rep<R: BufRead>(
    reader: &mut Reader<R>,
    e: &BytesStart,
    body: bool,
    builder: &mut DocumentBuilder,
    owner: &str,
    representation: Option<&str>,
) -> ParseResult<NodeId> {
    let attrs = Attrs::read(e)?;
    let id = match attrs.get("id").filter(|id| !id.trim().is_empty()) {
        Some(id) => {
            builder.claim(&id)?;
            id
        }
        None => builder.synthetic_id(owner, "crep")?,
    };

    let mut geometry = GeometryRef {
        id,
        name: attrs.get("name"),
        format: attrs.get("format"),
        location: attrs.text("location"),
        source: GeometrySource::CompoundRep {
            representation: representation.map(str::to_string),
        },
        ..Default::default()
    };

    children(reader, "CompoundRep", body, |reader, e, body| {
        match e.local_name().as_ref() {
            b"Transform" => geometry.transform = Some(parse_transform(reader, e, body)?),
            b"UserData" => geometry.user_data.push(parse_user_data(reader, e, body)?),
            b"TableAttribute" => geometry.table = Some(parse_table(reader, e, body)?),
            _ => return Ok(false),
        }
        Ok(true)
    })?;

    Ok(builder.push_node(GraphNode::GeometryRef(geometry)))
}

fn parse_relation<R: BufRead>(
    reader: &mut Reader<R>,
    e: &BytesStart,
    body: bool,
    builder: &mut DocumentBuilder,
) -> ParseResult<()> {
    let attrs = Attrs::read(e)?;
    let id = attrs.required("id")?;
    builder.claim(&id)?;

    let mut relation = Relation {
        id,
        sub_type: attrs.get("subType"),
        related_refs: attrs.text("relatedRefs"),
        ..Default::default()
    };

    children(reader, "Relation", body, |reader, e, body| {
        if e.local_name().as_ref() == b"UserData" {
            relation.user_data.push(parse_user_data(reader, e, body)?);
            Ok(true)
        } else {
            Ok(false)
        }
    })?;

    builder.document.relations.push(relation);
    Ok(())
}

fn parse_general_object<R: BufRead>(
    reader: &mut Reader<R>,
    e: &BytesStart,
    body: bool,
    builder: &mut DocumentBuilder,
) -> ParseResult<()> {
    let attrs = Attrs::read(e)?;
    let id = attrs.required("id")?;
    builder.claim(&id)?;

    let mut object = GeneralObject {
        id,
        class_name: attrs.get("class"),
        user_data: Vec::new(),
    };

    children(reader, "GeneralObject", body, |reader, e, body| {
        if e.local_name().as_ref() == b"UserData" {
            object.user_data.push(parse_user_data(reader, e, body)?);
            Ok(true)
        } else {
            Ok(false)
        }
    })?;

    let index = builder.document.general_objects.len();
    builder.general_index.insert(object.id.clone(), index);
    builder.document.general_objects.push(object);
    Ok(())
}

fn parse_transform<R: BufRead>(
    reader: &mut Reader<R>,
    e: &BytesStart,
    body: bool,
) -> ParseResult<SourceTransform> {
    let attrs = Attrs::read(e)?;
    let id = attrs.get("id");
    let text = children(reader, "Transform", body, |_, _, _| Ok(false))?;

    let label = id.clone().unwrap_or_else(|| "<anonymous>".to_string());
    let values = text
        .split_whitespace()
        .map(f64::from_str)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| ParseError::InvalidTransform {
            id: label.clone(),
            message: err.to_string(),
        })?;

    let values: [f64; 16] = values
        .try_into()
        .map_err(|v: Vec<f64>| ParseError::InvalidTransform {
            id: label,
            message: format!("found {} values", v.len()),
        })?;

    Ok(SourceTransform {
        id,
        matrix: from_row_major(&values),
    })
}

fn parse_user_data<R: BufRead>(reader: &mut Reader<R>, e: &BytesStart, body: bool) -> ParseResult<UserData> {
    let attrs = Attrs::read(e)?;
    let mut user_data = UserData {
        kind: attrs.get("type"),
        values: Vec::new(),
    };

    children(reader, "UserData", body, |_, e, body| {
        if e.local_name().as_ref() != b"UserValue" {
            return Ok(false);
        }
        let attrs = Attrs::read(e)?;
        user_data.values.push(UserValue {
            title: attrs.text("title"),
            value: attrs.text("value"),
        });
        // A UserValue with a body is skipped by the caller.
        Ok(!body)
    })?;

    Ok(user_data)
}

fn parse_table<R: BufRead>(reader: &mut Reader<R>, e: &BytesStart, body: bool) -> ParseResult<MaterialTable> {
    let attrs = Attrs::read(e)?;
    let mut table = MaterialTable {
        definition_ref: attrs.get("definitionRef"),
        rows: Vec::new(),
    };

    children(reader, "TableAttribute", body, |reader, e, body| {
        if e.local_name().as_ref() != b"Row" {
            return Ok(false);
        }
        let mut row = TableRow::default();
        children(reader, "Row", body, |_, e, body| {
            if e.local_name().as_ref() != b"Column" {
                return Ok(false);
            }
            let attrs = Attrs::read(e)?;
            let col: u32 = attrs
                .parse("col")?
                .ok_or_else(|| ParseError::MissingAttribute {
                    element: "Column".to_string(),
                    attribute: "col",
                })?;
            row.columns.insert(col, attrs.text("value"));
            Ok(!body)
        })?;
        table.rows.push(row);
        Ok(true)
    })?;

    Ok(table)
}
