use regex::Regex;
use std::sync::LazyLock;

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^()]*\)").expect("static regex"));

/// Naming convention applied to result field names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldConvention {
    /// `recordId`, `spatialResolution`
    #[default]
    Camel,
    /// `Record Id`, `Spatial Resolution`
    Words,
    /// `RECORD_ID`, `SPATIAL_RESOLUTION`
    Upper,
}

impl FieldConvention {
    /// Converts a RAPI field name or label into this convention.
    pub fn convert(self, field: &str) -> String {
        match self {
            FieldConvention::Camel => to_camel_case(field),
            FieldConvention::Words => split_words(field).join(" "),
            FieldConvention::Upper => {
                let field = BRACKETED.replace_all(field, "");
                split_words(field.trim())
                    .iter()
                    .map(|w| w.to_uppercase())
                    .collect::<Vec<_>>()
                    .join("_")
            }
        }
    }

    pub const ALL: [FieldConvention; 3] = [
        FieldConvention::Camel,
        FieldConvention::Words,
        FieldConvention::Upper,
    ];
}

impl std::str::FromStr for FieldConvention {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "camel" => Ok(FieldConvention::Camel),
            "words" => Ok(FieldConvention::Words),
            "upper" => Ok(FieldConvention::Upper),
            other => anyhow::bail!(
                "unknown field convention '{}' (expected camel, words or upper)",
                other
            ),
        }
    }
}

fn to_camel_case(field: &str) -> String {
    let field = BRACKETED.replace_all(field, "");

    let words: Vec<&str> = if field.contains(' ') {
        field.split(' ').collect()
    } else if field.contains('_') {
        field.split('_').collect()
    } else {
        let mut chars = field.chars();
        return match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect(),
            None => String::new(),
        };
    };

    let mut out = words[0].to_lowercase();
    for w in &words[1..] {
        out.push_str(&title_case(w));
    }
    out
}

/// Upper-cases the first letter of every alphabetic run and lower-cases the rest.
fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut prev_alpha = false;
    for c in word.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// Splits on spaces, then underscores, then camel-case boundaries, and
/// capitalizes each word.
fn split_words(field: &str) -> Vec<String> {
    if field.contains(' ') {
        return field
            .split(' ')
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
    }
    if field.contains('_') {
        return field
            .split('_')
            .filter(|w| !w.is_empty())
            .map(title_case)
            .collect();
    }

    let chars: Vec<char> = field.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && !current.is_empty() {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = (prev.is_lowercase() && c.is_uppercase())
                || (prev.is_uppercase() && c.is_uppercase() && next_lower);
            if boundary {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .into_iter()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => w,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_from_labels_and_ids() {
        let c = FieldConvention::Camel;
        assert_eq!(c.convert("Spatial Resolution"), "spatialResolution");
        assert_eq!(c.convert("Incidence Angle (Decimal Degrees)"), "incidenceAngle");
        assert_eq!(c.convert("PROCESSING_FACILITY"), "processingFacility");
        assert_eq!(c.convert("RecordId"), "recordId");
        assert_eq!(c.convert("recordId"), "recordId");
        assert_eq!(c.convert("WKT Geometry"), "wktGeometry");
        assert_eq!(c.convert(""), "");
    }

    #[test]
    fn words_split_camel_case() {
        let c = FieldConvention::Words;
        assert_eq!(c.convert("recordId"), "Record Id");
        assert_eq!(c.convert("thisRecordUrl"), "This Record Url");
        assert_eq!(c.convert("WKTGeometry"), "WKT Geometry");
        assert_eq!(c.convert("Beam Mode Type"), "Beam Mode Type");
        assert_eq!(c.convert("RECORD_ID"), "Record Id");
    }

    #[test]
    fn conventions_rekey_each_other() {
        for from in FieldConvention::ALL {
            let key = from.convert("collectionId");
            assert_eq!(FieldConvention::Camel.convert(&key), "collectionId");
            assert_eq!(FieldConvention::Words.convert(&key), "Collection Id");
            assert_eq!(FieldConvention::Upper.convert(&key), "COLLECTION_ID");
        }
    }

    #[test]
    fn upper_drops_brackets() {
        let c = FieldConvention::Upper;
        assert_eq!(c.convert("collectionId"), "COLLECTION_ID");
        assert_eq!(c.convert("Incidence Angle (Decimal Degrees)"), "INCIDENCE_ANGLE");
        assert_eq!(c.convert("geometry"), "GEOMETRY");
    }

    #[test]
    fn parses_names() {
        assert_eq!("UPPER".parse::<FieldConvention>().unwrap(), FieldConvention::Upper);
        assert!("snake".parse::<FieldConvention>().is_err());
    }
}
