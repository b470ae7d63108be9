//! An in-memory editor for the interactive-form subsystem of PDF.
//!
//! [`Document`] parses a complete PDF byte sequence, enumerates AcroForm
//! fields, adds fields with widget annotations, updates and renames
//! values, removes fields, and serializes either as an incremental update
//! (the original bytes preserved verbatim) or as a rewritten
//! single-revision document.
//!
//! ```no_run
//! use acroedit::{Document, FieldOptions};
//!
//! let mut doc = Document::open_path("form.pdf")?;
//!
//! for field in doc.list_fields() {
//!     println!("{}: {:?}", field.name(), field.value());
//! }
//!
//! doc.add_field("Name", &FieldOptions::text().value("John Doe"))?;
//! doc.update_field("Email", "john@example.com", None);
//! doc.write_to("filled.pdf", false)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

mod actions;
mod diag;
mod document;
mod error;
mod field;
mod filter;
mod image;
mod incremental;
mod lex;
mod object_stream;
mod objects;
mod page;
mod resolve;
mod rewrite;
mod scan;
mod strings;
mod xref;

pub use crate::{
    actions::clear::FieldSelector,
    diag::{DiagnosticSink, LogSink, RecordingSink},
    document::Document,
    error::{ParseError, PdfResult},
    field::{Field, FieldKind, FieldOptions, FieldPosition, FieldType},
    objects::{Reference, Value},
    page::{Page, PageBoxes},
    scan::{each_dictionary, DictIter},
    strings::{
        decode_pdf_string, encode_pdf_name, encode_pdf_string, format_pdf_key, format_pdf_value,
        transliterate_to_ascii,
    },
};
