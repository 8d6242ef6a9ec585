//! Position maps for transformed modules.
//!
//! A [`PositionMap`] records how coordinates in transformed code relate to
//! coordinates in the code a transform received. Maps from successive
//! transform hooks are composed so the final serve-time map still points at
//! the original source, and the result is inlined into the served module as
//! a `data:` URI comment.
//!
//! The JSON shape is liffey's own. Transforms in this pipeline hand maps to
//! each other in process, so the compact VLQ `mappings` encoding of Source
//! Map V3 would only add a codec between two Rust structs.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// One generated-position → original-position entry.
///
/// Lines and columns are 0-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub generated_line: u32,
    pub generated_column: u32,
    pub original_line: u32,
    pub original_column: u32,
}

/// Mapping from transformed-code coordinates back to original-source
/// coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionMap {
    /// Identity of the original source (module id or file path).
    pub source: String,
    /// Entries sorted by generated position.
    pub mappings: Vec<Mapping>,
}

impl PositionMap {
    /// Create an empty map for `source`.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            mappings: Vec::new(),
        }
    }

    /// Create a line-identity map for `source`: every line of the generated
    /// code maps to the same line of the original.
    #[must_use]
    pub fn line_identity(source: impl Into<String>, line_count: u32) -> Self {
        let mappings = (0..line_count)
            .map(|line| Mapping {
                generated_line: line,
                generated_column: 0,
                original_line: line,
                original_column: 0,
            })
            .collect();
        Self {
            source: source.into(),
            mappings,
        }
    }

    /// Add a mapping entry. Entries must be added in generated order.
    pub fn add(&mut self, mapping: Mapping) {
        self.mappings.push(mapping);
    }

    /// Look up the original position for a generated position.
    ///
    /// Returns the entry at or nearest before the queried position, the
    /// usual consumer behavior for positions between mapping points.
    #[must_use]
    pub fn original_position(&self, line: u32, column: u32) -> Option<(u32, u32)> {
        let mut best: Option<&Mapping> = None;
        for m in &self.mappings {
            if m.generated_line > line
                || (m.generated_line == line && m.generated_column > column)
            {
                break;
            }
            best = Some(m);
        }
        best.map(|m| (m.original_line, m.original_column))
    }

    /// Compose this map (latest transform) over `earlier` (previous
    /// transform), producing a map from this map's generated space straight
    /// to `earlier`'s original space.
    #[must_use]
    pub fn compose(&self, earlier: &PositionMap) -> PositionMap {
        let mappings = self
            .mappings
            .iter()
            .filter_map(|m| {
                earlier
                    .original_position(m.original_line, m.original_column)
                    .map(|(line, column)| Mapping {
                        generated_line: m.generated_line,
                        generated_column: m.generated_column,
                        original_line: line,
                        original_column: column,
                    })
            })
            .collect();
        PositionMap {
            source: earlier.source.clone(),
            mappings,
        }
    }

    /// Shift every generated line by `lines`, for callers that prepend a
    /// preamble to the mapped code before serving it.
    #[must_use]
    pub fn with_generated_line_offset(mut self, lines: u32) -> Self {
        for mapping in &mut self.mappings {
            mapping.generated_line += lines;
        }
        self
    }

    /// Render the map as a trailing source-map comment with an inline
    /// base64 `data:` URI, ready to append to the served module body.
    #[must_use]
    pub fn to_inline_comment(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        format!(
            "//# sourceMappingURL=data:application/json;base64,{}",
            STANDARD.encode(json)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(source: &str, entries: &[(u32, u32, u32, u32)]) -> PositionMap {
        let mut m = PositionMap::new(source);
        for &(gl, gc, ol, oc) in entries {
            m.add(Mapping {
                generated_line: gl,
                generated_column: gc,
                original_line: ol,
                original_column: oc,
            });
        }
        m
    }

    #[test]
    fn test_original_position_nearest_before() {
        let m = map("/src/a.ts", &[(0, 0, 0, 0), (2, 4, 10, 2)]);
        assert_eq!(m.original_position(0, 7), Some((0, 0)));
        assert_eq!(m.original_position(2, 4), Some((10, 2)));
        assert_eq!(m.original_position(5, 0), Some((10, 2)));
    }

    #[test]
    fn test_compose_chains_to_original_source() {
        // original --(first transform)--> intermediate --(second)--> final
        let first = map("/src/a.ts", &[(0, 0, 3, 0), (1, 0, 5, 0)]);
        let second = map("intermediate", &[(0, 0, 0, 0), (4, 0, 1, 0)]);

        let composed = second.compose(&first);
        assert_eq!(composed.source, "/src/a.ts");
        // final line 4 → intermediate line 1 → original line 5
        assert_eq!(composed.original_position(4, 0), Some((5, 0)));
        assert_eq!(composed.original_position(0, 0), Some((3, 0)));
    }

    #[test]
    fn test_line_identity() {
        let m = PositionMap::line_identity("/src/a.ts", 3);
        assert_eq!(m.original_position(2, 9), Some((2, 0)));
    }

    #[test]
    fn test_inline_comment_shape() {
        let m = map("/src/a.ts", &[(0, 0, 0, 0)]);
        let comment = m.to_inline_comment();
        assert!(comment.starts_with("//# sourceMappingURL=data:application/json;base64,"));
        // Round-trips through the data URI payload.
        let b64 = comment.rsplit(',').next().unwrap();
        let decoded = STANDARD.decode(b64).unwrap();
        let parsed: PositionMap = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(parsed, m);
    }
}
