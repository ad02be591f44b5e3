//! Shared document state.
//!
//! Wraps a yrs document whose `default` XML fragment holds the rich-text
//! tree the editor binds to.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use yrs::types::Attrs;
use yrs::updates::decoder::Decode;
use yrs::{
    Any, Doc, GetString, ReadTxn, StateVector, Text, Transact, TransactionMut, Update, Xml,
    XmlElementPrelim, XmlElementRef, XmlFragment, XmlFragmentRef, XmlTextPrelim, XmlTextRef,
};

use super::markdown::{Block, Inline, ListItem, Mark, StructuredDoc};

/// Name of the XML fragment the editor binds to
pub const FRAGMENT_NAME: &str = "default";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("malformed document update: {0}")]
    Decode(String),

    #[error("could not apply document update: {0}")]
    Apply(String),
}

pub struct SharedDocument {
    doc: Doc,
    fragment: XmlFragmentRef,
}

impl Default for SharedDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedDocument {
    pub fn new() -> Self {
        let doc = Doc::new();
        let fragment = doc.get_or_insert_xml_fragment(FRAGMENT_NAME);
        Self { doc, fragment }
    }

    /// Number of top-level nodes
    pub fn len(&self) -> u32 {
        self.fragment.len(&self.doc.transact())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append converted markdown as a single transaction
    pub fn merge(&self, structured: &StructuredDoc) {
        let mut txn = self.doc.transact_mut();
        for block in &structured.blocks {
            write_block(&mut txn, &self.fragment, block);
        }
    }

    /// Apply a v1-encoded update from a client
    pub fn apply_update(&self, update: &[u8]) -> Result<(), DocumentError> {
        let update = Update::decode_v1(update).map_err(|e| DocumentError::Decode(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| DocumentError::Apply(e.to_string()))
    }

    /// Full state as a v1 update, for newly connected clients
    pub fn encode_state(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }

    /// XML rendering of the fragment
    pub fn to_xml(&self) -> String {
        self.fragment.get_string(&self.doc.transact())
    }
}

fn element<P: XmlFragment>(txn: &mut TransactionMut, parent: &P, tag: &str) -> XmlElementRef {
    parent.push_back(txn, XmlElementPrelim::empty(tag))
}

fn write_block<P: XmlFragment>(txn: &mut TransactionMut, parent: &P, block: &Block) {
    match block {
        Block::Heading { level, content } => {
            let node = element(txn, parent, "heading");
            node.insert_attribute(txn, "level", level.to_string());
            write_inlines(txn, &node, content);
        }
        Block::Paragraph(content) => {
            let node = element(txn, parent, "paragraph");
            write_inlines(txn, &node, content);
        }
        Block::BulletList(items) => {
            let node = element(txn, parent, "bulletList");
            write_items(txn, &node, items);
        }
        Block::OrderedList { start, items } => {
            let node = element(txn, parent, "orderedList");
            node.insert_attribute(txn, "start", start.to_string());
            write_items(txn, &node, items);
        }
        Block::CodeBlock { language, text } => {
            let node = element(txn, parent, "codeBlock");
            if let Some(language) = language {
                node.insert_attribute(txn, "language", language.clone());
            }
            if !text.is_empty() {
                let run: XmlTextRef = node.push_back(txn, XmlTextPrelim::new(""));
                run.insert(txn, 0, text);
            }
        }
        Block::Blockquote(blocks) => {
            let node = element(txn, parent, "blockquote");
            for child in blocks {
                write_block(txn, &node, child);
            }
        }
        Block::HorizontalRule => {
            element(txn, parent, "horizontalRule");
        }
    }
}

fn write_items(txn: &mut TransactionMut, list: &XmlElementRef, items: &[ListItem]) {
    for item in items {
        let node = element(txn, list, "listItem");
        for block in &item.blocks {
            write_block(txn, &node, block);
        }
    }
}

/// Text runs share one text node until a hard break splits them
fn write_inlines(txn: &mut TransactionMut, node: &XmlElementRef, content: &[Inline]) {
    let mut run: Option<XmlTextRef> = None;
    for inline in content {
        match inline {
            Inline::Text { text, marks } => {
                let target = match &run {
                    Some(target) => target.clone(),
                    None => {
                        let target: XmlTextRef = node.push_back(txn, XmlTextPrelim::new(""));
                        run = Some(target.clone());
                        target
                    }
                };
                let index = target.len(&*txn);
                if marks.is_empty() {
                    target.insert(txn, index, text);
                } else {
                    target.insert_with_attributes(txn, index, text, mark_attrs(marks));
                }
            }
            Inline::HardBreak => {
                element(txn, node, "hardBreak");
                run = None;
            }
        }
    }
}

fn mark_attrs(marks: &[Mark]) -> Attrs {
    let empty = || Any::Map(Arc::new(HashMap::new()));
    marks
        .iter()
        .map(|mark| {
            let (name, value) = match mark {
                Mark::Bold => ("bold", empty()),
                Mark::Italic => ("italic", empty()),
                Mark::Strike => ("strike", empty()),
                Mark::Code => ("code", empty()),
                Mark::Link { href } => {
                    let attrs = HashMap::from([("href".to_string(), Any::from(href.clone()))]);
                    ("link", Any::Map(Arc::new(attrs)))
                }
            };
            (Arc::from(name), value)
        })
        .collect()
}
