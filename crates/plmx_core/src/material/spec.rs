use crate::plmxml::{MaterialTable, TableRow};

/// Column indices of the material table.
pub mod columns {
    pub const GROUP: u32 = 0;
    pub const STANDARD: u32 = 1;
    pub const NUMBER: u32 = 2;
    pub const TREATMENT: u32 = 3;
    pub const TERM: u32 = 7;
    pub const BODY_NAME: u32 = 10;
}

/// Raw material fields as they appear in the source table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MaterialSpec {
    pub group: String,
    pub standard: String,
    pub number: String,
    pub treatment: String,
    pub term: String,
    pub body_name: String,
}

impl MaterialSpec {
    /// Shorthand for the three fields that name a material.
    pub fn new(group: &str, term: &str, number: &str) -> Self {
        Self {
            group: group.to_string(),
            term: term.to_string(),
            number: number.to_string(),
            ..Default::default()
        }
    }

    /// Pick the known columns out of a table row. Other columns are ignored.
    pub fn from_row(row: &TableRow) -> Self {
        let field = |col| row.get(col).trim().to_string();
        Self {
            group: field(columns::GROUP),
            standard: field(columns::STANDARD),
            number: field(columns::NUMBER),
            treatment: field(columns::TREATMENT),
            term: field(columns::TERM),
            body_name: field(columns::BODY_NAME),
        }
    }

    /// Spec from the table's first non-blank row.
    pub fn from_table(table: &MaterialTable) -> Option<Self> {
        table.primary_row().map(Self::from_row).filter(|spec| !spec.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|f| f.is_empty())
    }

    fn fields(&self) -> [&str; 6] {
        [
            &self.group,
            &self.standard,
            &self.number,
            &self.treatment,
            &self.term,
            &self.body_name,
        ]
    }

    /// All fields lower-cased and joined by spaces.
    pub fn blob(&self) -> String {
        self.fields()
            .iter()
            .filter(|f| !f.is_empty())
            .map(|f| f.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Deterministic material name: `group_term_number`, sanitized.
    pub fn material_name(&self) -> String {
        sanitize_name(&format!("{}_{}_{}", self.group, self.term, self.number))
    }
}

/// Replace anything outside `[A-Za-z0-9_.-]` with `_` and collapse runs of
/// `_`. Leading and trailing separators are kept, so a blank field still
/// shows in the name.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    out
}

/// True if a sanitized name carries no characters besides separators.
pub fn is_blank_name(name: &str) -> bool {
    name.chars().all(|c| c == '_')
}

/// Token before the first `_`, used to group related materials.
pub fn base_type(name: &str) -> &str {
    name.split('_').next().unwrap_or(name)
}
