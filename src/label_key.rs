use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

/// Dense integer codes for the label strings of one training set.
/// Keys are handed out in order of first appearance, so the mapping is a
/// bijection between `0..len()` and the distinct labels.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelKey
{
    labels: Vec<String>,
    keys: FxHashMap<String, usize>,
}

impl LabelKey
{
    pub fn fit<'a>(labels: impl IntoIterator<Item = &'a str>) -> Self
    {
        let mut label_key = LabelKey::default();
        for label in labels
        {
            if !label_key.keys.contains_key(label) {
                label_key.keys.insert(label.to_string(), label_key.labels.len());
                label_key.labels.push(label.to_string());
            }
        }
        label_key
    }

    pub fn len(&self) -> usize
    {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.labels.is_empty()
    }

    pub fn key(&self, label: &str) -> Option<usize>
    {
        self.keys.get(label).copied()
    }

    pub fn label(&self, key: usize) -> Option<&str>
    {
        self.labels.get(key).map(String::as_str)
    }

    pub fn encode(&self, label: &str) -> Result<usize>
    {
        self.key(label).ok_or_else(|| Error::Metric(format!("label {:?} was not seen during training", label)))
    }

    /// Labels in key order.
    pub fn labels(&self) -> &[String]
    {
        &self.labels
    }
}
