use crate::{
    document::Document,
    objects::{Reference, Value},
};

/// Field types, `/FT` in file syntax. Button fields split on the Radio
/// flag (bit 0x8000 of `/Ff`); anything unrecognized reads as text, the
/// same default applied when `/FT` is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Button { radio: bool },
    Choice,
    Signature,
}

impl FieldType {
    pub(crate) fn from_ft(name: &str, flags: i64) -> Self {
        match name {
            "Btn" => Self::Button {
                radio: flags & 0x8000 != 0,
            },
            "Ch" => Self::Choice,
            "Sig" => Self::Signature,
            _ => Self::Text,
        }
    }

    /// The `/FT` name, without the slash
    pub fn ft_name(&self) -> &'static str {
        match self {
            Self::Text => "Tx",
            Self::Button { .. } => "Btn",
            Self::Choice => "Ch",
            Self::Signature => "Sig",
        }
    }
}

/// On-page placement of a field's widget, with the page 1-indexed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldPosition {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub page: usize,
}

/// An immutable descriptor of one form field.
///
/// Fields are snapshots produced by enumeration, not live views: after a
/// mutating call, re-list to observe the change. Mutating helpers take
/// the owning [`Document`] explicitly.
#[derive(Debug, Clone)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) value: Option<String>,
    pub(crate) field_type: FieldType,
    pub(crate) re: Reference,
    pub(crate) position: Option<FieldPosition>,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn object_number(&self) -> usize {
        self.re.object_number
    }

    pub fn generation(&self) -> usize {
        self.re.generation
    }

    pub fn valid_ref(&self) -> bool {
        self.re.object_number > 0
    }

    pub fn x(&self) -> Option<f64> {
        self.position.map(|p| p.x)
    }

    pub fn y(&self) -> Option<f64> {
        self.position.map(|p| p.y)
    }

    pub fn width(&self) -> Option<f64> {
        self.position.map(|p| p.width)
    }

    pub fn height(&self) -> Option<f64> {
        self.position.map(|p| p.height)
    }

    pub fn page(&self) -> Option<usize> {
        self.position.map(|p| p.page)
    }

    pub fn text_field(&self) -> bool {
        self.field_type == FieldType::Text
    }

    pub fn button_field(&self) -> bool {
        matches!(self.field_type, FieldType::Button { .. })
    }

    pub fn choice_field(&self) -> bool {
        self.field_type == FieldType::Choice
    }

    pub fn signature_field(&self) -> bool {
        self.field_type == FieldType::Signature
    }

    /// Set this field's value. Returns `false` when the field no longer
    /// exists in `doc`, e.g. after a rename or removal.
    pub fn update(&self, doc: &mut Document, value: impl Into<Value>) -> bool {
        if !self.valid_ref() {
            return false;
        }

        doc.update_field(&self.name, value, None)
    }

    pub fn rename(&self, doc: &mut Document, new_name: &str) -> bool {
        if !self.valid_ref() {
            return false;
        }

        match self.value.clone() {
            Some(value) => doc.update_field(&self.name, value, Some(new_name)),
            None => doc.update_field(&self.name, Value::Text(String::new()), Some(new_name)),
        }
    }

    pub fn remove(&self, doc: &mut Document) -> bool {
        if !self.valid_ref() {
            return false;
        }

        doc.remove_field(&self.name)
    }
}

/// How a new field should be created. The geometry defaults match the
/// common single-line text box: 100x20 points at (100, 500) on page 1.
#[derive(Debug, Clone)]
pub struct FieldOptions {
    pub value: Option<Value>,
    pub kind: FieldKind,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// 1-indexed
    pub page: usize,
    /// Radio buttons: the group field this option belongs to
    pub group_id: Option<String>,
    /// Radio buttons: whether this option starts selected
    pub selected: bool,
    /// Additional entries copied verbatim into the field dictionary
    pub metadata: Vec<(String, Value)>,
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self {
            value: None,
            kind: FieldKind::Text,
            x: 100.0,
            y: 500.0,
            width: 100.0,
            height: 20.0,
            page: 1,
            group_id: None,
            selected: false,
            metadata: Vec::new(),
        }
    }
}

impl FieldOptions {
    pub fn text() -> Self {
        Self::default()
    }

    pub fn kind(kind: FieldKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn rect(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.x = x;
        self.y = y;
        self.width = width;
        self.height = height;
        self
    }

    pub fn page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    pub fn group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn selected(mut self, selected: bool) -> Self {
        self.selected = selected;
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// What kind of field to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// A plain push button
    Button,
    Checkbox,
    Radio,
    Choice,
    Signature,
    /// An explicit `/FT` name for anything else
    Name(String),
}

impl FieldKind {
    pub(crate) fn ft_name(&self) -> &str {
        match self {
            Self::Text => "Tx",
            Self::Button | Self::Checkbox | Self::Radio => "Btn",
            Self::Choice => "Ch",
            Self::Signature => "Sig",
            Self::Name(name) => name,
        }
    }

    pub(crate) fn is_radio(&self) -> bool {
        matches!(self, Self::Radio)
    }

    pub(crate) fn is_checkbox(&self) -> bool {
        matches!(self, Self::Checkbox)
    }

    pub(crate) fn is_button(&self) -> bool {
        matches!(self, Self::Button | Self::Checkbox | Self::Radio)
    }

    pub(crate) fn is_signature(&self) -> bool {
        matches!(self, Self::Signature)
    }
}
