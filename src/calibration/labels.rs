//! Class-name encoding for validation labels.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::CalibrationError;

/// Name of the healthy class in the labelled history.
pub const NORMAL_CLASS: &str = "NORMAL";

/// Sorted class vocabulary plus the id treated as "normal".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoding {
    pub classes: Vec<String>,
    pub normal_id: usize,
}

impl LabelEncoding {
    /// Classes are the sorted unique names of `all`. The normal class is
    /// `NORMAL` when present, otherwise the most frequent class of `reference`
    /// (ties go to the lowest id).
    pub fn fit(all: &[String], reference: &[String]) -> Result<Self, CalibrationError> {
        let classes: Vec<String> = all
            .iter()
            .chain(reference)
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if classes.is_empty() {
            return Err(CalibrationError::EmptyValidationSet);
        }

        let normal_id = match classes.iter().position(|c| c == NORMAL_CLASS) {
            Some(id) => id,
            None => {
                let source = if reference.is_empty() { all } else { reference };
                let mut counts: HashMap<&str, usize> = HashMap::new();
                for name in source {
                    *counts.entry(name.as_str()).or_default() += 1;
                }
                classes
                    .iter()
                    .enumerate()
                    .max_by(|(ia, a), (ib, b)| {
                        let ca = counts.get(a.as_str()).copied().unwrap_or(0);
                        let cb = counts.get(b.as_str()).copied().unwrap_or(0);
                        ca.cmp(&cb).then(ib.cmp(ia))
                    })
                    .map_or(0, |(id, _)| id)
            }
        };

        Ok(Self { classes, normal_id })
    }

    pub fn normal_class(&self) -> Option<&str> {
        self.classes.get(self.normal_id).map(String::as_str)
    }

    /// `true` for every label that is not the normal class.
    pub fn binarize(&self, labels: &[String]) -> Vec<bool> {
        let normal = self.normal_class();
        labels.iter().map(|l| Some(l.as_str()) != normal).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normal_class_by_name() {
        let enc = LabelEncoding::fit(&names(&["FALLA", "NORMAL", "ALERTA"]), &[]).unwrap();
        assert_eq!(enc.classes, names(&["ALERTA", "FALLA", "NORMAL"]));
        assert_eq!(enc.normal_id, 2);
        assert_eq!(enc.binarize(&names(&["NORMAL", "FALLA"])), vec![false, true]);
    }

    #[test]
    fn test_most_frequent_reference_class() {
        let all = names(&["ok", "bad", "ok", "bad", "bad"]);
        let reference = names(&["ok", "ok", "bad"]);
        let enc = LabelEncoding::fit(&all, &reference).unwrap();
        assert_eq!(enc.normal_class(), Some("ok"));
    }

    #[test]
    fn test_frequency_tie_takes_lowest_id() {
        let enc = LabelEncoding::fit(&names(&["b", "a"]), &[]).unwrap();
        assert_eq!(enc.normal_id, 0);
    }

    #[test]
    fn test_empty_rejected() {
        assert!(LabelEncoding::fit(&[], &[]).is_err());
    }
}
