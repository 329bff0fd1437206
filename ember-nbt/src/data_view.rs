use indexmap::{IndexMap, map::IntoIter};

use crate::tag::NbtTag;

/// Separates the segments of a path such as `"Level.Sections"`.
pub const PATH_SEPARATOR: char = '.';

/// A value that can flatten itself into a [`DataView`], to be written as a nested compound.
pub trait DataSerializable {
    fn to_container(&self) -> DataView;
}

/// A string keyed tree of tag values, addressed by dotted paths.
///
/// Key order carries no meaning (equality ignores it), but insertion order is kept so that
/// re-encoding a decoded view reproduces the original bytes.
///
/// Keys read from the wire may themselves contain a `.`; those are only reachable through the
/// `*_local` accessors.
#[derive(Clone, Debug, Default)]
pub struct DataView {
    child_tags: IndexMap<String, NbtTag>,
}

impl DataView {
    pub fn new() -> DataView {
        DataView {
            child_tags: IndexMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.child_tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.child_tags.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.child_tags.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NbtTag)> {
        self.child_tags.iter().map(|(key, tag)| (key.as_str(), tag))
    }

    #[inline]
    pub fn get_local(&self, key: &str) -> Option<&NbtTag> {
        self.child_tags.get(key)
    }

    /// Inserts directly under `key` without path splitting, replacing any previous value.
    ///
    /// A replaced value keeps its original position.
    pub fn put_local(&mut self, key: &str, value: impl Into<NbtTag>) -> Option<NbtTag> {
        let value = value.into();
        match self.child_tags.get_mut(key) {
            Some(tag) => Some(std::mem::replace(tag, value)),
            None => {
                self.child_tags.insert(key.to_string(), value);
                None
            }
        }
    }

    /// Removes `key`, keeping the order of the remaining entries.
    pub fn remove_local(&mut self, key: &str) -> Option<NbtTag> {
        self.child_tags.shift_remove(key)
    }

    pub fn get(&self, path: &str) -> Option<&NbtTag> {
        match path.split_once(PATH_SEPARATOR) {
            None => self.get_local(path),
            Some((head, rest)) => self.get_local(head)?.extract_compound()?.get(rest),
        }
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut NbtTag> {
        let (head, rest) = match path.split_once(PATH_SEPARATOR) {
            None => (path, None),
            Some((head, rest)) => (head, Some(rest)),
        };
        let tag = self.child_tags.get_mut(head)?;
        match rest {
            None => Some(tag),
            Some(rest) => tag.extract_compound_mut()?.get_mut(rest),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Sets the value at `path`, creating intermediate views as needed.
    ///
    /// An intermediate segment that holds a non view value is replaced by an empty view.
    pub fn set(&mut self, path: &str, value: impl Into<NbtTag>) -> Option<NbtTag> {
        match path.rsplit_once(PATH_SEPARATOR) {
            None => self.put_local(path, value),
            Some((parent, key)) => self.create_view(parent).put_local(key, value),
        }
    }

    pub fn remove(&mut self, path: &str) -> Option<NbtTag> {
        match path.rsplit_once(PATH_SEPARATOR) {
            None => self.remove_local(path),
            Some((parent, key)) => self.get_view_mut(parent)?.remove_local(key),
        }
    }

    /// Returns the view at `path`, creating it (and every parent) if it is missing.
    pub fn create_view(&mut self, path: &str) -> &mut DataView {
        let (head, rest) = match path.split_once(PATH_SEPARATOR) {
            None => (path, None),
            Some((head, rest)) => (head, Some(rest)),
        };

        let tag = self
            .child_tags
            .entry(head.to_string())
            .or_insert_with(|| NbtTag::Compound(DataView::new()));
        if !matches!(tag, NbtTag::Compound(_)) {
            *tag = NbtTag::Compound(DataView::new());
        }

        let view = match tag {
            NbtTag::Compound(view) => view,
            _ => unreachable!("entry was just made a compound"),
        };
        match rest {
            None => view,
            Some(rest) => view.create_view(rest),
        }
    }

    pub fn set_bool(&mut self, path: &str, value: bool) {
        self.set(path, NbtTag::Byte(if value { 1 } else { 0 }));
    }

    pub fn set_serializable(&mut self, path: &str, value: &impl DataSerializable) {
        self.set(path, NbtTag::Compound(value.to_container()));
    }

    pub fn get_byte(&self, path: &str) -> Option<i8> {
        self.get(path).and_then(|tag| tag.extract_byte())
    }

    pub fn get_short(&self, path: &str) -> Option<i16> {
        self.get(path).and_then(|tag| tag.extract_short())
    }

    pub fn get_int(&self, path: &str) -> Option<i32> {
        self.get(path).and_then(|tag| tag.extract_int())
    }

    pub fn get_long(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(|tag| tag.extract_long())
    }

    pub fn get_float(&self, path: &str) -> Option<f32> {
        self.get(path).and_then(|tag| tag.extract_float())
    }

    pub fn get_double(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(|tag| tag.extract_double())
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(|tag| tag.extract_bool())
    }

    pub fn get_string(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|tag| tag.extract_string())
    }

    pub fn get_byte_array(&self, path: &str) -> Option<&[u8]> {
        self.get(path).and_then(|tag| tag.extract_byte_array())
    }

    pub fn get_int_array(&self, path: &str) -> Option<&[i32]> {
        self.get(path).and_then(|tag| tag.extract_int_array())
    }

    pub fn get_list(&self, path: &str) -> Option<&[NbtTag]> {
        self.get(path).and_then(|tag| tag.extract_list())
    }

    pub fn get_view(&self, path: &str) -> Option<&DataView> {
        self.get(path).and_then(|tag| tag.extract_compound())
    }

    pub fn get_view_mut(&mut self, path: &str) -> Option<&mut DataView> {
        self.get_mut(path).and_then(|tag| tag.extract_compound_mut())
    }

    /// The views of a list of compounds. `None` if the list holds anything else.
    pub fn get_views(&self, path: &str) -> Option<Vec<&DataView>> {
        self.get_list(path)?
            .iter()
            .map(NbtTag::extract_compound)
            .collect()
    }

    /// Reads a list of doubles, the way positions and motions are stored.
    pub fn get_doubles(&self, path: &str) -> Option<Vec<f64>> {
        self.get_list(path)?
            .iter()
            .map(NbtTag::extract_double)
            .collect()
    }
}

impl PartialEq for DataView {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .child_tags
                .iter()
                .all(|(key, tag)| other.get_local(key) == Some(tag))
    }
}

impl FromIterator<(String, NbtTag)> for DataView {
    fn from_iter<T: IntoIterator<Item = (String, NbtTag)>>(iter: T) -> Self {
        let mut view = DataView::new();
        for (key, value) in iter {
            view.put_local(&key, value);
        }
        view
    }
}

impl IntoIterator for DataView {
    type Item = (String, NbtTag);
    type IntoIter = IntoIter<String, NbtTag>;

    fn into_iter(self) -> Self::IntoIter {
        self.child_tags.into_iter()
    }
}

impl Extend<(String, NbtTag)> for DataView {
    fn extend<T: IntoIterator<Item = (String, NbtTag)>>(&mut self, iter: T) {
        for (key, value) in iter {
            self.put_local(&key, value);
        }
    }
}

// Rust's AsRef is currently not reflexive so we need to implement it manually
impl AsRef<DataView> for DataView {
    fn as_ref(&self) -> &DataView {
        self
    }
}
