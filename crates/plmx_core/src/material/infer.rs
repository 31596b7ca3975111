//! Keyword-driven material classification.
//!
//! The six material fields of a table row are lower-cased into one blob,
//! split into alphanumeric tokens and tested against each family's keywords
//! in [`MaterialFamily::PRIORITY`] order. The first family with a hit derives
//! the PBR parameters, refined by that family's modifier words.
//!
//! Keywords match a token depending on their length:
//!
//! - five characters or more: anywhere inside the token (`stahl` in `edelstahl`)
//! - four characters: at the start or end of the token (`alum` in `alumg3`,
//!   `guss` in `grauguss`)
//! - three or fewer: the whole token, optionally followed by digits (`pa` in `pa66`)

use std::fmt;

use plmx_math::Vec3;
use serde::Serialize;

use super::spec::MaterialSpec;
use crate::context::RunContext;
use crate::scene::Material;

/// Default color of unrecognised metal grades.
pub const STEEL_GRAY: Vec3 = Vec3::new(0.56, 0.57, 0.58);

/// Largest per-channel shift a grade number applies to [`STEEL_GRAY`].
pub const GRADE_SPREAD: f32 = 0.04;

const METAL_KEYWORDS: &[&str] = &[
    "stahl", "steel", "stainless", "metal", "eisen", "iron", "guss", "cast", "alum", "alu", "almg",
    "alsi", "kupfer", "copper", "messing", "brass", "bronze", "gold", "zink", "zinc", "titan",
    "chrom", "nickel", "blech",
];
const PLASTIC_KEYWORDS: &[&str] = &[
    "kunststoff", "plastic", "polymer", "polyamid", "polypropyl", "polyethyl", "polycarbonat",
    "polyoxymethyl", "thermoplast", "duroplast", "pa", "pp", "pe", "pc", "abs", "pom", "pvc",
    "pbt", "pet", "tpu",
];
const RUBBER_KEYWORDS: &[&str] = &[
    "gummi", "rubber", "elastomer", "kautschuk", "epdm", "nbr", "fkm", "sbr", "tpe",
];
const WOOD_KEYWORDS: &[&str] = &[
    "holz", "wood", "eiche", "oak", "buche", "beech", "kiefer", "pine", "fichte", "spruce",
    "birke", "birch", "sperrholz", "plywood", "mdf",
];
const GLASS_KEYWORDS: &[&str] = &[
    "glas", "glass", "verglasung", "glazing", "pmma", "acryl", "plexiglas",
];
const SEALANT_KEYWORDS: &[&str] = &[
    "dicht", "sealant", "sealer", "seal", "kleber", "klebstoff", "adhesive", "glue", "silikon",
    "silicone",
];

const GLOSS_WORDS: &[&str] = &[
    "gloss", "glossy", "glanz", "glaenzend", "glänzend", "hochglanz", "poliert", "polished",
];
const ALUMINUM_WORDS: &[&str] = &["alum", "alu", "almg", "alsi"];
const COPPER_WORDS: &[&str] = &["kupfer", "copper"];
const GOLD_WORDS: &[&str] = &["gold", "vergoldet"];

/// Plastic color words with their base color.
const PLASTIC_COLORS: &[(&[&str], Vec3)] = &[
    (&["schwarz", "black"], Vec3::new(0.02, 0.02, 0.02)),
    (&["weiss", "weiß", "white"], Vec3::new(0.9, 0.9, 0.9)),
    (&["rot", "red"], Vec3::new(0.7, 0.05, 0.05)),
    (&["blau", "blue"], Vec3::new(0.05, 0.15, 0.6)),
    (&["gruen", "grün", "green"], Vec3::new(0.05, 0.5, 0.1)),
    (&["gelb", "yellow"], Vec3::new(0.9, 0.75, 0.05)),
    (&["grau", "grey", "gray"], Vec3::new(0.4, 0.4, 0.4)),
];

/// Wood species with their base color.
const WOOD_SPECIES: &[(&[&str], Vec3)] = &[
    (&["eiche", "oak"], Vec3::new(0.52, 0.37, 0.22)),
    (&["buche", "beech"], Vec3::new(0.72, 0.52, 0.36)),
    (&["kiefer", "pine", "fichte", "spruce"], Vec3::new(0.82, 0.66, 0.45)),
];

/// Material families in the order they are tested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum MaterialFamily {
    Metal,
    Plastic,
    Rubber,
    Wood,
    Glass,
    Sealant,
    /// Nothing matched.
    Default,
}

impl MaterialFamily {
    /// Test order; the first family with a keyword hit wins.
    pub const PRIORITY: [MaterialFamily; 6] = [
        MaterialFamily::Metal,
        MaterialFamily::Plastic,
        MaterialFamily::Rubber,
        MaterialFamily::Wood,
        MaterialFamily::Glass,
        MaterialFamily::Sealant,
    ];

    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            MaterialFamily::Metal => METAL_KEYWORDS,
            MaterialFamily::Plastic => PLASTIC_KEYWORDS,
            MaterialFamily::Rubber => RUBBER_KEYWORDS,
            MaterialFamily::Wood => WOOD_KEYWORDS,
            MaterialFamily::Glass => GLASS_KEYWORDS,
            MaterialFamily::Sealant => SEALANT_KEYWORDS,
            MaterialFamily::Default => &[],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MaterialFamily::Metal => "metal",
            MaterialFamily::Plastic => "plastic",
            MaterialFamily::Rubber => "rubber",
            MaterialFamily::Wood => "wood",
            MaterialFamily::Glass => "glass",
            MaterialFamily::Sealant => "sealant",
            MaterialFamily::Default => "default",
        }
    }

    /// Derive the parameters of this family from the blob's tokens.
    fn derive(self, tokens: &[String], spec: &MaterialSpec) -> InferredMaterial {
        let glossy = any_match(GLOSS_WORDS, tokens);
        match self {
            MaterialFamily::Metal => {
                let base_color = if any_match(ALUMINUM_WORDS, tokens) {
                    Vec3::new(0.91, 0.92, 0.92)
                } else if any_match(COPPER_WORDS, tokens) {
                    Vec3::new(0.95, 0.64, 0.54)
                } else if any_match(GOLD_WORDS, tokens) {
                    Vec3::new(1.0, 0.78, 0.34)
                } else {
                    let offset = grade_code(spec).map(grade_offset).unwrap_or(Vec3::ZERO);
                    STEEL_GRAY + offset
                };
                InferredMaterial {
                    family: self,
                    base_color,
                    metalness: 1.0,
                    roughness: if glossy { 0.15 } else { 0.35 },
                    ior: 2.5,
                    transparency: 0.0,
                }
            }
            MaterialFamily::Plastic => {
                let base_color = PLASTIC_COLORS
                    .iter()
                    .find(|(words, _)| any_match(words, tokens))
                    .map(|(_, color)| *color)
                    .unwrap_or(Vec3::new(0.1, 0.1, 0.1));
                InferredMaterial {
                    family: self,
                    base_color,
                    metalness: 0.0,
                    roughness: if glossy { 0.2 } else { 0.5 },
                    ior: 1.46,
                    transparency: 0.0,
                }
            }
            MaterialFamily::Rubber => InferredMaterial {
                family: self,
                base_color: Vec3::new(0.03, 0.03, 0.03),
                metalness: 0.0,
                roughness: 0.9,
                ior: 1.52,
                transparency: 0.0,
            },
            MaterialFamily::Wood => InferredMaterial {
                family: self,
                base_color: WOOD_SPECIES
                    .iter()
                    .find(|(words, _)| any_match(words, tokens))
                    .map(|(_, color)| *color)
                    .unwrap_or(Vec3::new(0.6, 0.45, 0.3)),
                metalness: 0.0,
                roughness: 0.7,
                ior: 1.5,
                transparency: 0.0,
            },
            MaterialFamily::Glass => InferredMaterial {
                family: self,
                base_color: Vec3::new(0.95, 0.97, 0.97),
                metalness: 0.0,
                roughness: 0.05,
                ior: 1.5,
                transparency: 0.9,
            },
            MaterialFamily::Sealant => InferredMaterial {
                family: self,
                base_color: Vec3::new(0.85, 0.85, 0.82),
                metalness: 0.0,
                roughness: 0.6,
                ior: 1.45,
                transparency: 0.0,
            },
            MaterialFamily::Default => InferredMaterial::default(),
        }
    }
}

impl fmt::Display for MaterialFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a [`MaterialSpec`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct InferredMaterial {
    pub family: MaterialFamily,
    pub base_color: Vec3,
    pub metalness: f32,
    pub roughness: f32,
    pub ior: f32,
    pub transparency: f32,
}

impl Default for InferredMaterial {
    fn default() -> Self {
        Self {
            family: MaterialFamily::Default,
            base_color: Vec3::new(0.5, 0.5, 0.5),
            metalness: 0.0,
            roughness: 0.5,
            ior: 1.5,
            transparency: 0.0,
        }
    }
}

impl InferredMaterial {
    /// Scene material carrying these parameters.
    pub fn to_material(&self, name: impl Into<String>) -> Material {
        Material {
            name: name.into(),
            diffuse_color: self.base_color,
            metallic: self.metalness,
            roughness: self.roughness,
            ior: self.ior,
            opacity: 1.0 - self.transparency,
        }
    }

    /// Read parameters back from a scene material of a known family.
    pub fn from_material(family: MaterialFamily, material: &Material) -> Self {
        Self {
            family,
            base_color: material.diffuse_color,
            metalness: material.metallic,
            roughness: material.roughness,
            ior: material.ior,
            transparency: 1.0 - material.opacity,
        }
    }
}

/// Classify a spec, recording unrecognised tokens on the run context.
pub fn infer(spec: &MaterialSpec, ctx: &mut RunContext) -> InferredMaterial {
    let tokens = tokenize(&spec.blob());

    for token in &tokens {
        if !token.chars().all(|c| c.is_ascii_digit()) && !is_known(token) {
            ctx.note_unknown(token);
        }
    }

    let family = MaterialFamily::PRIORITY
        .into_iter()
        .find(|family| any_match(family.keywords(), &tokens))
        .unwrap_or(MaterialFamily::Default);

    let inferred = family.derive(&tokens, spec);
    log::debug!(
        "Material '{}' classified as {} (color {:.2}/{:.2}/{:.2}, roughness {:.2})",
        spec.material_name(),
        inferred.family,
        inferred.base_color.x,
        inferred.base_color.y,
        inferred.base_color.z,
        inferred.roughness
    );
    inferred
}

fn tokenize(blob: &str) -> Vec<String> {
    blob.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn matches_token(keyword: &str, token: &str) -> bool {
    match keyword.chars().count() {
        0 => false,
        1..=3 => token
            .strip_prefix(keyword)
            .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit())),
        4 => token.starts_with(keyword) || token.ends_with(keyword),
        _ => token.contains(keyword),
    }
}

fn any_match(keywords: &[&str], tokens: &[String]) -> bool {
    tokens
        .iter()
        .any(|token| keywords.iter().any(|kw| matches_token(kw, token)))
}

/// True if some family keyword or modifier word accounts for the token.
fn is_known(token: &str) -> bool {
    let modifiers = [GLOSS_WORDS, ALUMINUM_WORDS, COPPER_WORDS, GOLD_WORDS];
    MaterialFamily::PRIORITY
        .iter()
        .map(|family| family.keywords())
        .chain(modifiers)
        .chain(PLASTIC_COLORS.iter().map(|(words, _)| *words))
        .chain(WOOD_SPECIES.iter().map(|(words, _)| *words))
        .any(|words| words.iter().any(|kw| matches_token(kw, token)))
}

/// Digits of the term, or of the group if the term has none.
fn grade_code(spec: &MaterialSpec) -> Option<u64> {
    [&spec.term, &spec.group].into_iter().find_map(|field| {
        let digits: String = field.chars().filter(char::is_ascii_digit).take(18).collect();
        digits.parse().ok()
    })
}

/// Small deterministic color shift derived from a grade number.
fn grade_offset(code: u64) -> Vec3 {
    let h = code.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let channel = |shift: u32| ((h >> shift) & 0xff) as f32 / 255.0 * 2.0 - 1.0;
    Vec3::new(channel(40), channel(48), channel(56)) * GRADE_SPREAD
}
