//! The page-side text field the endpoint binds to.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::watch;

/// Best-effort description of an element, used for logging and for the
/// status display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementIdentity {
    pub tag: String,
    pub id: Option<String>,
    pub name: Option<String>,

    /// The `type` attribute of an `<input>`, if it has one.
    pub input_type: Option<String>,
}

impl ElementIdentity {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            id: None,
            name: None,
            input_type: None,
        }
    }

    pub fn textarea() -> Self {
        Self::new("textarea")
    }

    pub fn text_input() -> Self {
        Self::new("input").with_input_type("text")
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_input_type(mut self, input_type: impl Into<String>) -> Self {
        self.input_type = Some(input_type.into());
        self
    }

    /// Whether the element holds plain editable text: a `<textarea>`, or an
    /// `<input>` whose type is `text` or missing.
    pub fn is_text_field(&self) -> bool {
        if self.tag.eq_ignore_ascii_case("textarea") {
            return true;
        }

        self.tag.eq_ignore_ascii_case("input")
            && self
                .input_type
                .as_deref()
                .map_or(true, |ty| ty.eq_ignore_ascii_case("text"))
    }
}

impl fmt::Display for ElementIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag.to_ascii_uppercase())?;

        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            write!(f, "#{}", id)?;
        }

        if let Some(name) = self.name.as_deref().filter(|name| !name.is_empty()) {
            write!(f, "[name=\"{}\"]", name)?;
        }

        Ok(())
    }
}

/// A cursor or selection, in UTF-16 code units like DOM selection offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectionRange {
    pub start: usize,
    pub end: usize,
}

impl SelectionRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn caret(offset: usize) -> Self {
        Self::new(offset, offset)
    }

    pub fn clamp(self, len: usize) -> Self {
        Self {
            start: self.start.min(len),
            end: self.end.min(len),
        }
    }
}

/// Length of `text` as the page counts it.
pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// The capability the endpoint needs from a page element.
///
/// `attach` and `detach` start and stop the element's own edit listener,
/// which reports genuine user input to the endpoint. `notify_input` is a
/// separate path: it tells everything else on the page that the value
/// changed after a remote update, and must not reach the endpoint's
/// forwarding logic.
pub trait TextField: Send + 'static {
    fn identity(&self) -> ElementIdentity;
    fn value(&self) -> String;
    fn selection(&self) -> SelectionRange;
    fn set_value(&mut self, value: &str);
    fn set_selection(&mut self, selection: SelectionRange);
    fn attach(&mut self);
    fn detach(&mut self);
    fn notify_input(&mut self);
}

/// A `TextField` that lives in memory. Clones share the same field, so one
/// clone can be bound to an endpoint while another plays the user.
#[derive(Debug, Clone)]
pub struct MemoryField {
    inner: Arc<Mutex<MemoryFieldInner>>,
}

#[derive(Debug)]
struct MemoryFieldInner {
    identity: ElementIdentity,
    value: String,
    selection: SelectionRange,
    attached: bool,
    input_events: usize,
    rendered: watch::Sender<String>,
}

impl MemoryField {
    pub fn new(identity: ElementIdentity, value: impl Into<String>) -> Self {
        let value = value.into();
        let (rendered, _) = watch::channel(value.clone());

        Self {
            inner: Arc::new(Mutex::new(MemoryFieldInner {
                identity,
                selection: SelectionRange::caret(utf16_len(&value)),
                value,
                attached: false,
                input_events: 0,
                rendered,
            })),
        }
    }

    pub fn textarea(value: impl Into<String>) -> Self {
        Self::new(ElementIdentity::textarea(), value)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryFieldInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the value the way a user typing would: the caret ends up at
    /// the end and no input notification is raised here. The caller reports
    /// the edit to the endpoint itself.
    pub fn type_value(&self, value: impl Into<String>) {
        let mut inner = self.lock();
        inner.value = value.into();
        inner.selection = SelectionRange::caret(utf16_len(&inner.value));
    }

    pub fn is_attached(&self) -> bool {
        self.lock().attached
    }

    /// How many input notifications remote updates have raised.
    pub fn input_events(&self) -> usize {
        self.lock().input_events
    }

    /// Receives the value every time a remote update is rendered.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.lock().rendered.subscribe()
    }
}

impl TextField for MemoryField {
    fn identity(&self) -> ElementIdentity {
        self.lock().identity.clone()
    }

    fn value(&self) -> String {
        self.lock().value.clone()
    }

    fn selection(&self) -> SelectionRange {
        self.lock().selection
    }

    fn set_value(&mut self, value: &str) {
        self.lock().value = value.to_owned();
    }

    fn set_selection(&mut self, selection: SelectionRange) {
        let mut inner = self.lock();
        let len = utf16_len(&inner.value);
        inner.selection = selection.clamp(len);
    }

    fn attach(&mut self) {
        self.lock().attached = true;
    }

    fn detach(&mut self) {
        self.lock().attached = false;
    }

    fn notify_input(&mut self) {
        let mut inner = self.lock();
        inner.input_events += 1;
        let value = inner.value.clone();
        inner.rendered.send_replace(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_page_label() {
        let identity = ElementIdentity::textarea()
            .with_id("editor")
            .with_name("body");
        assert_eq!(identity.to_string(), "TEXTAREA#editor[name=\"body\"]");

        assert_eq!(ElementIdentity::text_input().to_string(), "INPUT");
        assert_eq!(
            ElementIdentity::text_input().with_name("q").to_string(),
            "INPUT[name=\"q\"]"
        );
    }

    #[test]
    fn only_plain_text_fields_are_bindable() {
        assert!(ElementIdentity::textarea().is_text_field());
        assert!(ElementIdentity::new("TEXTAREA").is_text_field());
        assert!(ElementIdentity::text_input().is_text_field());
        assert!(ElementIdentity::new("input").is_text_field());

        assert!(!ElementIdentity::new("input")
            .with_input_type("password")
            .is_text_field());
        assert!(!ElementIdentity::new("div").is_text_field());
    }

    #[test]
    fn selection_clamps_to_length() {
        assert_eq!(
            SelectionRange::new(3, 9).clamp(5),
            SelectionRange::new(3, 5)
        );
        assert_eq!(SelectionRange::caret(2).clamp(5), SelectionRange::caret(2));
    }

    #[test]
    fn utf16_length_counts_surrogate_pairs() {
        assert_eq!(utf16_len("abc"), 3);
        assert_eq!(utf16_len("é"), 1);
        assert_eq!(utf16_len("😀"), 2);
    }

    #[test]
    fn memory_field_clones_share_state() {
        let field = MemoryField::textarea("one");
        let mut bound = field.clone();

        bound.set_value("two");
        assert_eq!(field.value(), "two");

        field.type_value("three!");
        assert_eq!(bound.value(), "three!");
        assert_eq!(bound.selection(), SelectionRange::caret(6));
    }

    #[test]
    fn notify_input_publishes_value() {
        let mut field = MemoryField::textarea("");
        let rendered = field.subscribe();

        field.set_value("fresh");
        field.notify_input();

        assert_eq!(*rendered.borrow(), "fresh");
        assert_eq!(field.input_events(), 1);
    }
}
