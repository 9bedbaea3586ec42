//! Combining several sub-tags into one logical tag
//!
//! Files such as WavPack or MP3 can carry more than one tag dialect at once.
//! A [`TagUnion`] presents them as a single [`Tag`]:
//!
//! - reads walk the sub-tags in their declared order and return the first
//!   non-empty (or non-zero) value;
//! - writes go to every sub-tag that exists, so the dialects never diverge
//!   once a field has been set.
//!
//! The union borrows the sub-tags from the file that owns them and is built
//! fresh whenever it is needed, so it can never outlive them.

use crate::property_map::PropertyMap;
use crate::tag::Tag;
use crate::variant::VariantMap;

/// First non-empty string produced by `get` over the present providers
pub fn first_non_empty<P, I, F>(providers: I, get: F) -> String
where
    I: IntoIterator<Item = Option<P>>,
    F: Fn(&P) -> String,
{
    providers
        .into_iter()
        .flatten()
        .map(|p| get(&p))
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

/// First non-zero number produced by `get` over the present providers
pub fn first_non_zero<P, I, F>(providers: I, get: F) -> u32
where
    I: IntoIterator<Item = Option<P>>,
    F: Fn(&P) -> u32,
{
    providers
        .into_iter()
        .flatten()
        .map(|p| get(&p))
        .find(|value| *value != 0)
        .unwrap_or(0)
}

fn union_is_empty<'t>(sources: impl Iterator<Item = Option<&'t dyn Tag>>) -> bool {
    sources.flatten().all(|tag| tag.is_empty())
}

fn union_properties<'t>(sources: impl Iterator<Item = Option<&'t dyn Tag>>) -> PropertyMap {
    sources
        .flatten()
        .map(|tag| tag.properties())
        .find(|props| !props.is_empty() || !props.unsupported_data().is_empty())
        .unwrap_or_default()
}

fn union_complex_keys<'t>(sources: impl Iterator<Item = Option<&'t dyn Tag>>) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for tag in sources.flatten() {
        for key in tag.complex_property_keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}

fn union_complex_properties<'t>(
    sources: impl Iterator<Item = Option<&'t dyn Tag>>,
    key: &str,
) -> Vec<VariantMap> {
    sources
        .flatten()
        .map(|tag| tag.complex_properties(key))
        .find(|records| !records.is_empty())
        .unwrap_or_default()
}

/// Read-write union over mutably borrowed sub-tags
pub struct TagUnion<'a> {
    tags: Vec<Option<&'a mut dyn Tag>>,
}

impl<'a> TagUnion<'a> {
    /// `tags` in read precedence order; `None` slots are skipped
    pub fn new(tags: Vec<Option<&'a mut dyn Tag>>) -> Self {
        Self { tags }
    }

    /// Shared reborrows of the slots. Collected so the iterator does not
    /// carry `'a`.
    fn sources(&self) -> std::vec::IntoIter<Option<&dyn Tag>> {
        let sources: Vec<Option<&dyn Tag>> = self
            .tags
            .iter()
            .map(|slot| slot.as_deref().map(|tag| tag as &dyn Tag))
            .collect();
        sources.into_iter()
    }

    fn present_mut(&mut self) -> impl Iterator<Item = &mut &'a mut dyn Tag> + '_ {
        self.tags.iter_mut().flatten()
    }

    /// Number of sub-tags that exist
    pub fn present_count(&self) -> usize {
        self.tags.iter().filter(|slot| slot.is_some()).count()
    }
}

impl Tag for TagUnion<'_> {
    fn title(&self) -> String {
        first_non_empty(self.sources(), |t| t.title())
    }

    fn artist(&self) -> String {
        first_non_empty(self.sources(), |t| t.artist())
    }

    fn album(&self) -> String {
        first_non_empty(self.sources(), |t| t.album())
    }

    fn comment(&self) -> String {
        first_non_empty(self.sources(), |t| t.comment())
    }

    fn genre(&self) -> String {
        first_non_empty(self.sources(), |t| t.genre())
    }

    fn year(&self) -> u32 {
        first_non_zero(self.sources(), |t| t.year())
    }

    fn track(&self) -> u32 {
        first_non_zero(self.sources(), |t| t.track())
    }

    fn set_title(&mut self, value: &str) {
        self.present_mut().for_each(|t| t.set_title(value));
    }

    fn set_artist(&mut self, value: &str) {
        self.present_mut().for_each(|t| t.set_artist(value));
    }

    fn set_album(&mut self, value: &str) {
        self.present_mut().for_each(|t| t.set_album(value));
    }

    fn set_comment(&mut self, value: &str) {
        self.present_mut().for_each(|t| t.set_comment(value));
    }

    fn set_genre(&mut self, value: &str) {
        self.present_mut().for_each(|t| t.set_genre(value));
    }

    fn set_year(&mut self, value: u32) {
        self.present_mut().for_each(|t| t.set_year(value));
    }

    fn set_track(&mut self, value: u32) {
        self.present_mut().for_each(|t| t.set_track(value));
    }

    fn is_empty(&self) -> bool {
        union_is_empty(self.sources())
    }

    fn properties(&self) -> PropertyMap {
        union_properties(self.sources())
    }

    /// Every present sub-tag receives `properties`; a key is reported back
    /// only if no sub-tag could store it
    fn set_properties(&mut self, properties: &PropertyMap) -> PropertyMap {
        let mut rejected: Option<PropertyMap> = None;
        for tag in self.present_mut() {
            let left = tag.set_properties(properties);
            rejected = Some(match rejected {
                None => left,
                Some(mut acc) => {
                    let stored: Vec<String> = acc
                        .keys()
                        .filter(|key| !left.contains_key(key))
                        .cloned()
                        .collect();
                    for key in stored {
                        acc.erase(&key);
                    }
                    acc
                }
            });
        }
        rejected.unwrap_or_else(|| properties.clone())
    }

    fn remove_unsupported_properties(&mut self, ids: &[String]) {
        self.present_mut()
            .for_each(|t| t.remove_unsupported_properties(ids));
    }

    fn complex_property_keys(&self) -> Vec<String> {
        union_complex_keys(self.sources())
    }

    fn complex_properties(&self, key: &str) -> Vec<VariantMap> {
        union_complex_properties(self.sources(), key)
    }

    fn set_complex_properties(&mut self, key: &str, values: &[VariantMap]) -> bool {
        let mut stored = false;
        for tag in self.present_mut() {
            stored |= tag.set_complex_properties(key, values);
        }
        stored
    }
}

/// Read-only union over shared borrows, for inspecting a file without
/// mutable access
pub struct TagView<'a> {
    tags: Vec<Option<&'a dyn Tag>>,
}

impl<'a> TagView<'a> {
    pub fn new(tags: Vec<Option<&'a dyn Tag>>) -> Self {
        Self { tags }
    }

    fn sources(&self) -> impl Iterator<Item = Option<&'a dyn Tag>> + '_ {
        self.tags.iter().copied()
    }

    pub fn title(&self) -> String {
        first_non_empty(self.sources(), |t| t.title())
    }

    pub fn artist(&self) -> String {
        first_non_empty(self.sources(), |t| t.artist())
    }

    pub fn album(&self) -> String {
        first_non_empty(self.sources(), |t| t.album())
    }

    pub fn comment(&self) -> String {
        first_non_empty(self.sources(), |t| t.comment())
    }

    pub fn genre(&self) -> String {
        first_non_empty(self.sources(), |t| t.genre())
    }

    pub fn year(&self) -> u32 {
        first_non_zero(self.sources(), |t| t.year())
    }

    pub fn track(&self) -> u32 {
        first_non_zero(self.sources(), |t| t.track())
    }

    pub fn is_empty(&self) -> bool {
        union_is_empty(self.sources())
    }

    pub fn properties(&self) -> PropertyMap {
        union_properties(self.sources())
    }

    pub fn complex_property_keys(&self) -> Vec<String> {
        union_complex_keys(self.sources())
    }

    pub fn complex_properties(&self, key: &str) -> Vec<VariantMap> {
        union_complex_properties(self.sources(), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::tests::BasicTag;

    fn slot(tag: &mut BasicTag) -> Option<&mut dyn Tag> {
        Some(tag as &mut dyn Tag)
    }

    fn titled(title: &str) -> BasicTag {
        BasicTag {
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_first_non_empty_combinator() {
        let providers = [None, Some(""), Some("b"), Some("c")];
        assert_eq!(first_non_empty(providers, |s| s.to_string()), "b");
        assert_eq!(first_non_empty([None::<&str>, Some("")], |s| s.to_string()), "");
        assert_eq!(first_non_zero([Some(0u32), None, Some(9)], |n| *n), 9);
    }

    #[test]
    fn test_precedence_law() {
        for (a, b) in [("", ""), ("A", ""), ("", "B"), ("A", "B")] {
            let mut first = titled(a);
            let mut second = titled(b);
            let union = TagUnion::new(vec![slot(&mut first), slot(&mut second)]);
            let expected = if a.is_empty() { b } else { a };
            assert_eq!(union.title(), expected);
        }
    }

    #[test]
    fn test_absent_slots_are_skipped() {
        let mut only = titled("only");
        only.track = 5;
        let union = TagUnion::new(vec![None, slot(&mut only), None]);
        assert_eq!(union.title(), "only");
        assert_eq!(union.track(), 5);
        assert_eq!(union.present_count(), 1);

        let empty = TagUnion::new(vec![None, None]);
        assert_eq!(empty.title(), "");
        assert_eq!(empty.year(), 0);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_write_fan_out() {
        let mut first = titled("old");
        let mut second = BasicTag::default();
        {
            let mut union = TagUnion::new(vec![slot(&mut first), None, slot(&mut second)]);
            union.set_title("x");
            union.set_year(2020);
        }
        assert_eq!(first.title, "x");
        assert_eq!(second.title, "x");
        assert_eq!(first.year, 2020);
        assert_eq!(second.year, 2020);
    }

    #[test]
    fn test_set_properties_reports_keys_rejected_everywhere() {
        let mut first = BasicTag::default();
        let mut second = BasicTag::default();
        let mut union = TagUnion::new(vec![slot(&mut first), slot(&mut second)]);

        let mut props = PropertyMap::new();
        props.insert("TITLE", ["t"]);
        props.insert("MOOD", ["calm"]);
        let rejected = union.set_properties(&props);
        assert_eq!(rejected.get("MOOD").unwrap(), ["calm"]);
        assert!(!rejected.contains_key("TITLE"));
        assert_eq!(union.properties().first("TITLE"), "t");

        let mut nothing = TagUnion::new(vec![None]);
        assert_eq!(nothing.set_properties(&props), props);
    }

    #[test]
    fn test_view_reads_like_union() {
        let first = titled("");
        let mut second = titled("two");
        second.genre = "Rock".into();
        let view = TagView::new(vec![Some(&first as &dyn Tag), Some(&second as &dyn Tag)]);
        assert_eq!(view.title(), "two");
        assert_eq!(view.genre(), "Rock");
        assert_eq!(view.properties().first("GENRE"), "Rock");
        assert!(view.complex_property_keys().is_empty());
    }

    fn title_of(union: &TagUnion<'_>) -> String {
        union.title()
    }

    #[test]
    fn test_reads_outlive_the_borrow() {
        let mut tag = titled("kept");
        let title = {
            let union = TagUnion::new(vec![slot(&mut tag)]);
            title_of(&union)
        };
        assert_eq!(title, "kept");

        let view_title = {
            let view = TagView::new(vec![Some(&tag as &dyn Tag)]);
            let sources: Vec<_> = view.sources().collect();
            drop(view);
            sources[0].map(|t| t.title()).unwrap_or_default()
        };
        assert_eq!(view_title, "kept");
    }
}
