//! Default implementation of the [`CatalogParser`] contract.
//!
//! Reads the descriptor document extracted from a vendor catalog archive and
//! produces [`PackageDescriptor`]s. The document is a systems-management
//! catalog: `SoftwareDistributionPackage` elements carrying a `Properties`
//! element (package identity and type), a localized `Title`, and a
//! `Relationships` element with `Prerequisites` (plain identities are
//! singleton groups, `Or` elements are multi-member groups) and
//! `BundledUpdates`. Element namespaces vary between vendors, so matching is
//! on local names only.

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::contract::{BoxedError, CatalogParser};
use crate::model::{PackageDescriptor, PackageId, PackageKind, PrerequisiteGroup};

pub struct SdpCatalogParser;

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Prerequisites,
    Bundle,
}

#[derive(Default)]
struct PackageBuilder {
    id: Option<PackageId>,
    kind: PackageKind,
    title: String,
    prerequisites: Vec<PrerequisiteGroup>,
    bundle: Vec<PackageId>,
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl PackageBuilder {
    fn finish(self) -> Option<PackageDescriptor> {
        let id = self.id?;
        Some(PackageDescriptor {
            id,
            title: self.title,
            kind: self.kind,
            prerequisites: self.prerequisites,
            bundle: self.bundle,
            metadata: if self.metadata.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::Value::Object(self.metadata)
            },
        })
    }
}

fn attr_value(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, BoxedError> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_package_id(raw: &str) -> Option<PackageId> {
    match Uuid::parse_str(raw) {
        Ok(uuid) => Some(PackageId(uuid)),
        Err(_) => {
            warn!(value = raw, "unparsable package identity, skipped");
            None
        }
    }
}

pub fn parse_catalog_str(content: &str) -> Result<Vec<PackageDescriptor>, BoxedError> {
    let mut reader = Reader::from_str(content);
    let mut descriptors = Vec::new();

    let mut current: Option<PackageBuilder> = None;
    let mut section = Section::None;
    let mut or_group: Option<Vec<PackageId>> = None;
    let mut in_title = false;

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"SoftwareDistributionPackage" => {
                        current = Some(PackageBuilder::default());
                        section = Section::None;
                        or_group = None;
                    }
                    b"Properties" => {
                        if let Some(builder) = current.as_mut() {
                            for attr in e.attributes() {
                                let attr = attr?;
                                let key = String::from_utf8_lossy(attr.key.local_name().as_ref())
                                    .into_owned();
                                let value = attr.unescape_value()?.into_owned();
                                match key.as_str() {
                                    "PackageID" => builder.id = parse_package_id(&value),
                                    "PackageType" => {
                                        if value.eq_ignore_ascii_case("Detectoid") {
                                            builder.kind = PackageKind::Detectoid;
                                        }
                                    }
                                    _ => {
                                        builder
                                            .metadata
                                            .insert(key, serde_json::Value::String(value));
                                    }
                                }
                            }
                        }
                    }
                    b"Title" => in_title = current.is_some(),
                    b"Prerequisites" => section = Section::Prerequisites,
                    b"BundledUpdates" => section = Section::Bundle,
                    b"Or" => {
                        if section == Section::Prerequisites {
                            or_group = Some(Vec::new());
                        }
                    }
                    b"UpdateIdentity" => {
                        let id = attr_value(&e, b"UpdateID")?
                            .as_deref()
                            .and_then(parse_package_id);
                        if let (Some(id), Some(builder)) = (id, current.as_mut()) {
                            match section {
                                Section::Prerequisites => match or_group.as_mut() {
                                    // Members inside an Or element form one
                                    // group; a bare identity is a singleton
                                    // group of its own.
                                    Some(group) => group.push(id),
                                    None => builder
                                        .prerequisites
                                        .push(PrerequisiteGroup::single(id)),
                                },
                                Section::Bundle => builder.bundle.push(id),
                                Section::None => {}
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"SoftwareDistributionPackage" => {
                    if let Some(descriptor) = current.take().and_then(PackageBuilder::finish) {
                        descriptors.push(descriptor);
                    } else {
                        warn!("package element without a usable identity, dropped");
                    }
                    section = Section::None;
                }
                b"Title" => in_title = false,
                b"Prerequisites" | b"BundledUpdates" => section = Section::None,
                b"Or" => {
                    if let (Some(group), Some(builder)) = (or_group.take(), current.as_mut()) {
                        if !group.is_empty() {
                            builder.prerequisites.push(PrerequisiteGroup { members: group });
                        }
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                if in_title {
                    if let Some(builder) = current.as_mut() {
                        builder.title.push_str(t.unescape()?.trim());
                    }
                }
            }
            _ => {}
        }
    }

    debug!(packages = descriptors.len(), "parsed catalog document");
    Ok(descriptors)
}

#[async_trait]
impl CatalogParser for SdpCatalogParser {
    async fn parse(&self, document: &Path) -> Result<Vec<PackageDescriptor>, BoxedError> {
        let content = tokio::fs::read_to_string(document).await?;
        parse_catalog_str(&content)
    }
}
