//! Indented one-line-per-object view of a document, for inspection.

use std::collections::HashSet;
use std::fmt::Write;

use plmx_math::transform::DMat4Ext;

use super::types::*;

impl Document {
    /// Render the hierarchy reachable from the roots, each object once.
    pub fn outline(&self) -> String {
        let mut out = OutlineWriter {
            doc: self,
            lines: Vec::new(),
            seen: HashSet::new(),
        };

        if let Some(header) = &self.header {
            out.lines.push(format!(
                "Header: author={}",
                header.author.as_deref().unwrap_or("")
            ));
        }
        out.lines.push(format!("InstanceGraph: rootRefs={}", self.root_refs));

        for &root in &self.roots {
            out.visit(root, 0);
        }

        for relation in &self.relations {
            let mut line = format!("Relation: id={}", relation.id);
            if !relation.related_refs.is_empty() {
                let _ = write!(line, ", relatedRefs={}", relation.related_refs);
            }
            out.lines.push(line);
        }

        out.lines.join("\n")
    }
}

struct OutlineWriter<'a> {
    doc: &'a Document,
    lines: Vec<String>,
    seen: HashSet<NodeId>,
}

impl OutlineWriter<'_> {
    fn visit(&mut self, id: NodeId, depth: usize) {
        if !self.seen.insert(id) {
            return;
        }
        let indent = "  ".repeat(depth);
        let node = self.doc.node(id);

        match node {
            GraphNode::Part(part) => {
                let mut line = format!("{indent}Part: id={}", part.id);
                if !part.instance_refs.is_empty() {
                    let _ = write!(line, ", instanceRefs={}", part.instance_refs);
                }
                if !part.representation_refs.is_empty() {
                    let _ = write!(line, ", representationRefs={}", part.representation_refs);
                }
                if let Some(nomenclature) = node.nomenclature() {
                    let _ = write!(line, ", nomenclature={nomenclature}");
                }
                self.lines.push(line);

                self.representations(&part.representations, depth + 1);
                for &child in &part.children {
                    self.visit(child, depth + 1);
                }
            }
            GraphNode::Instance(inst) => {
                let mut line = format!("{indent}Instance: id={}", inst.id);
                if !inst.part_ref.is_empty() {
                    let _ = write!(line, ", partRef={}", inst.part_ref);
                }
                if let Some(nomenclature) = node.nomenclature() {
                    let _ = write!(line, ", nomenclature={nomenclature}");
                }
                self.lines.push(line);
                self.transform_line(&indent, inst.transform.as_ref());

                for &part in &inst.parts {
                    self.visit(part, depth + 1);
                }
                for &child in &inst.children {
                    self.visit(child, depth + 1);
                }
            }
            GraphNode::GeometryRef(geom) => self.geometry_line(&indent, geom),
        }
    }

    /// A part's geometry, with compound reps nested under a
    /// `Representation` line for the representation they came from.
    fn representations(&mut self, reps: &[NodeId], depth: usize) {
        let indent = "  ".repeat(depth);
        let mut open: Option<Option<&str>> = None;

        for &id in reps {
            if !self.seen.insert(id) {
                continue;
            }
            let Some(geom) = self.doc.geometry(id) else {
                continue;
            };
            match &geom.source {
                GeometrySource::Representation => {
                    self.geometry_line(&indent, geom);
                    open = Some(Some(geom.id.as_str()));
                }
                GeometrySource::CompoundRep { representation } => {
                    let group = representation.as_deref();
                    if open != Some(group) {
                        self.lines
                            .push(format!("{indent}Representation: id={}", group.unwrap_or("")));
                        open = Some(group);
                    }
                    self.geometry_line(&format!("{indent}  "), geom);
                }
            }
        }
    }

    fn geometry_line(&mut self, indent: &str, geom: &GeometryRef) {
        let label = match geom.source {
            GeometrySource::Representation => "Representation",
            GeometrySource::CompoundRep { .. } => "CompoundRep",
        };
        let mut line = format!("{indent}{label}: id={}", geom.id);
        if !geom.location.is_empty() {
            let _ = write!(line, ", location={}", geom.location);
        }
        if let Some(name) = &geom.name {
            let _ = write!(line, ", name={name}");
        }
        self.lines.push(line);
        self.transform_line(indent, geom.transform.as_ref());
    }

    fn transform_line(&mut self, indent: &str, transform: Option<&SourceTransform>) {
        if let Some(t) = transform {
            self.lines.push(format!(
                "{indent}  Transform: id={}, matrix={}",
                t.id.as_deref().unwrap_or(""),
                t.matrix.describe()
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::plmxml::parse_plmxml;

    #[test]
    fn test_outline_nests_and_visits_once() {
        let xml = r#"<PLMXML><Header author="me"/><ProductDef><InstanceGraph rootRefs="i1">
            <Instance id="i1" partRef="p1">
              <Transform id="t">1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1</Transform>
            </Instance>
            <Part id="p1" instanceRefs="i2 i3"/>
            <Instance id="i2" partRef="p2">
              <Transform>1 0 0 0 0 1 0 0 0 0 1 0 2 0 0 1</Transform>
            </Instance>
            <Instance id="i3" partRef="p2"/>
            <Part id="p2"><Representation id="r"><CompoundRep id="c" location="x.jt" name="body"/></Representation></Part>
            <Relation id="rel" relatedRefs="p1 p2"/>
        </InstanceGraph></ProductDef></PLMXML>"#;
        let doc = parse_plmxml(xml).unwrap();
        let outline = doc.outline();
        let lines: Vec<&str> = outline.lines().collect();

        assert_eq!(lines[0], "Header: author=me");
        assert_eq!(lines[1], "InstanceGraph: rootRefs=i1");
        assert_eq!(lines[2], "Instance: id=i1, partRef=p1");
        assert_eq!(lines[3], "  Transform: id=t, matrix=Identity");
        assert_eq!(lines[4], "  Part: id=p1, instanceRefs=i2 i3");
        assert_eq!(lines[5], "    Instance: id=i2, partRef=p2");
        assert!(lines[6].starts_with("      Transform: id=, matrix=[1.000"));
        assert_eq!(lines[7], "      Part: id=p2");
        assert_eq!(lines[8], "        Representation: id=r");
        assert_eq!(lines[9], "          CompoundRep: id=c, location=x.jt, name=body");
        // p2 was already printed under i2
        assert_eq!(lines[10], "    Instance: id=i3, partRef=p2");
        assert_eq!(lines[11], "Relation: id=rel, relatedRefs=p1 p2");
        assert_eq!(lines.len(), 12);
    }

    #[test]
    fn test_outline_groups_compound_reps() {
        let xml = r#"<PLMXML><ProductDef><InstanceGraph rootRefs="p">
            <Part id="p" representationRefs="shared">
              <Representation id="whole" location="whole.jt">
                <CompoundRep id="a" location="a.jt">
                  <Transform id="ta">1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1</Transform>
                </CompoundRep>
              </Representation>
            </Part>
            <Representation id="shared"><CompoundRep id="b" location="b.jt" name="lid"/></Representation>
        </InstanceGraph></ProductDef></PLMXML>"#;
        let doc = parse_plmxml(xml).unwrap();
        let outline = doc.outline();
        let lines: Vec<&str> = outline.lines().collect();

        assert_eq!(
            lines[1..],
            [
                "Part: id=p, representationRefs=shared",
                "  Representation: id=whole, location=whole.jt",
                "    CompoundRep: id=a, location=a.jt",
                "      Transform: id=ta, matrix=Identity",
                "  Representation: id=shared",
                "    CompoundRep: id=b, location=b.jt, name=lid",
            ]
        );
    }
}
