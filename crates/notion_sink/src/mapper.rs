//! Record to typed-property mapping.
//!
//! A record is a flat JSON object coming from the pipeline. The container
//! schema decides which fields are written and how each one is encoded:
//!
//! | type | source | encoded as |
//! |---|---|---|
//! | `title`, `rich_text` | string | `[{"text": {"content": s}}]` |
//! | `number` | number | the number |
//! | `url` | string | the string |
//! | `people` | display name | `[{"id": user_id}]` |
//!
//! Unknown person names drop the property with a warning; every other
//! mismatch rejects the record.

use crate::config::ContainerRef;
use crate::error::{SinkError, SinkResult};
use crate::schema::{Directory, DirectoryEntry, PropertyType, SchemaProperty, TargetSchema};
use serde_json::{json, Map, Value};
use std::fmt;

/// A record as received from the pipeline.
pub type Record = Map<String, Value>;

/// Source of the workspace directory, consulted only when a people property is mapped.
pub trait DirectorySource {
    /// Returns the directory, fetching it if necessary.
    fn directory(&self) -> SinkResult<Directory>;
}

impl DirectorySource for [DirectoryEntry] {
    fn directory(&self) -> SinkResult<Directory> {
        Ok(self.into())
    }
}

impl DirectorySource for Vec<DirectoryEntry> {
    fn directory(&self) -> SinkResult<Directory> {
        self.as_slice().directory()
    }
}

/// A non-fatal problem found while mapping a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingWarning {
    /// No directory entry has the given display name; the property was omitted.
    PersonNotFound {
        /// Property key.
        property: String,
        /// Name that was looked up.
        name: String,
    },
}

impl fmt::Display for MappingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingWarning::PersonNotFound { property, name } => write!(
                f,
                "no workspace user named '{}' for property '{}'; property omitted",
                name, property
            ),
        }
    }
}

/// Output of [`map_record_to_properties`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedProperties {
    /// Typed property values keyed by property key.
    pub properties: Map<String, Value>,
    /// Warnings recorded while mapping.
    pub warnings: Vec<MappingWarning>,
}

impl MappedProperties {
    /// Plain text of the title property, if it was mapped.
    pub fn title_text(&self, schema: &TargetSchema) -> Option<String> {
        let key = schema.title_property_name()?;
        let runs = self.properties.get(key)?.get("title")?.as_array()?;
        let text: String = runs
            .iter()
            .filter_map(|run| run.pointer("/text/content").and_then(Value::as_str))
            .collect();
        (!text.is_empty()).then_some(text)
    }

    /// The create body: `{"parent": {...}, "properties": {...}}`.
    pub fn create_payload(&self, container: &ContainerRef) -> Value {
        json!({
            "parent": container.parent(),
            "properties": self.properties,
        })
    }

    /// The update body: `{"properties": {...}}`. A page's parent cannot change.
    pub fn update_payload(&self) -> Value {
        json!({ "properties": self.properties })
    }
}

/// Maps a record onto the container's typed properties.
///
/// Only schema properties whose display name has a non-null value in the
/// record are produced. The directory is requested only if a people property
/// needs it.
pub fn map_record_to_properties<D>(
    record: &Record,
    schema: &TargetSchema,
    directory: &D,
) -> SinkResult<MappedProperties>
where
    D: DirectorySource + ?Sized,
{
    let mut mapped = MappedProperties::default();
    let mut people: Option<Directory> = None;

    for property in schema.iter() {
        let value = match record.get(&property.name) {
            None | Some(Value::Null) => continue,
            Some(value) => value,
        };

        let encoded = match &property.kind {
            PropertyType::Title | PropertyType::RichText => {
                let text = expect_str(property, value)?;
                json!({ property.kind.tag(): [{"text": {"content": text}}] })
            }
            PropertyType::Number => {
                if !value.is_number() {
                    return Err(wrong_shape(property, "a number", value));
                }
                json!({ "number": value })
            }
            PropertyType::Url => json!({ "url": expect_str(property, value)? }),
            PropertyType::People => {
                let name = expect_str(property, value)?;
                if people.is_none() {
                    people = Some(directory.directory()?);
                }
                let found = people
                    .as_deref()
                    .and_then(|entries| entries.iter().find(|e| e.name == name));
                match found {
                    Some(entry) => json!({ "people": [{"id": entry.id}] }),
                    None => {
                        mapped.warnings.push(MappingWarning::PersonNotFound {
                            property: property.key.clone(),
                            name: name.to_string(),
                        });
                        continue;
                    }
                }
            }
            PropertyType::Other(tag) => {
                return Err(SinkError::UnsupportedPropertyType {
                    property: property.key.clone(),
                    kind: tag.clone(),
                })
            }
        };

        mapped.properties.insert(property.key.clone(), encoded);
    }

    Ok(mapped)
}

fn expect_str<'a>(property: &SchemaProperty, value: &'a Value) -> SinkResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| wrong_shape(property, "a string", value))
}

fn wrong_shape(property: &SchemaProperty, expected: &str, value: &Value) -> SinkError {
    SinkError::InvalidPayload(format!(
        "property '{}' of type {} expects {}, got {}",
        property.key, property.kind, expected, value
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn schema(props: &[(&str, &str)]) -> TargetSchema {
        TargetSchema::new(
            props
                .iter()
                .map(|(name, tag)| SchemaProperty::new(*name, PropertyType::from_tag(tag)))
                .collect(),
        )
    }

    /// Counts how often the directory is requested.
    struct CountingDirectory {
        entries: Vec<DirectoryEntry>,
        calls: Cell<usize>,
    }

    impl DirectorySource for CountingDirectory {
        fn directory(&self) -> SinkResult<Directory> {
            self.calls.set(self.calls.get() + 1);
            self.entries.directory()
        }
    }

    fn no_people() -> Vec<DirectoryEntry> {
        Vec::new()
    }

    #[test]
    fn title_and_number() {
        let schema = schema(&[("Name", "title"), ("Score", "number")]);
        let mapped = map_record_to_properties(
            &record(json!({"Name": "Alpha", "Score": 5})),
            &schema,
            &no_people(),
        )
        .unwrap();

        assert_eq!(
            Value::Object(mapped.properties),
            json!({
                "Name": {"title": [{"text": {"content": "Alpha"}}]},
                "Score": {"number": 5}
            })
        );
        assert!(mapped.warnings.is_empty());
    }

    #[test]
    fn rich_text_and_url() {
        let schema = schema(&[("Notes", "rich_text"), ("Link", "url")]);
        let mapped = map_record_to_properties(
            &record(json!({"Notes": "hello", "Link": "https://example.com"})),
            &schema,
            &no_people(),
        )
        .unwrap();

        assert_eq!(
            mapped.properties["Notes"],
            json!({"rich_text": [{"text": {"content": "hello"}}]})
        );
        assert_eq!(mapped.properties["Link"], json!({"url": "https://example.com"}));
    }

    #[test]
    fn people_resolved_through_directory() {
        let schema = schema(&[("Owner", "people")]);
        let directory = vec![DirectoryEntry::new("u1", "Bob")];

        let mapped =
            map_record_to_properties(&record(json!({"Owner": "Bob"})), &schema, &directory)
                .unwrap();
        assert_eq!(
            Value::Object(mapped.properties),
            json!({"Owner": {"people": [{"id": "u1"}]}})
        );
    }

    #[test]
    fn unknown_person_is_a_warning() {
        let schema = schema(&[("Owner", "people"), ("Name", "title")]);
        let directory = vec![DirectoryEntry::new("u1", "Bob")];

        let mapped = map_record_to_properties(
            &record(json!({"Owner": "Unknown", "Name": "Alpha"})),
            &schema,
            &directory,
        )
        .unwrap();

        assert!(!mapped.properties.contains_key("Owner"));
        assert!(mapped.properties.contains_key("Name"));
        assert_eq!(
            mapped.warnings,
            vec![MappingWarning::PersonNotFound {
                property: "Owner".into(),
                name: "Unknown".into()
            }]
        );
    }

    #[test]
    fn directory_only_requested_for_people() {
        let schema = schema(&[("Name", "title"), ("Owner", "people"), ("Reviewer", "people")]);
        let directory = CountingDirectory {
            entries: vec![DirectoryEntry::new("u1", "Bob")],
            calls: Cell::new(0),
        };

        map_record_to_properties(&record(json!({"Name": "x"})), &schema, &directory).unwrap();
        assert_eq!(directory.calls.get(), 0);

        map_record_to_properties(
            &record(json!({"Owner": "Bob", "Reviewer": "Bob"})),
            &schema,
            &directory,
        )
        .unwrap();
        assert_eq!(directory.calls.get(), 1);
    }

    #[test]
    fn absent_null_and_extra_fields_are_omitted() {
        let schema = schema(&[("Name", "title"), ("Score", "number")]);
        let mapped = map_record_to_properties(
            &record(json!({"Score": null, "Unrelated": "x"})),
            &schema,
            &no_people(),
        )
        .unwrap();
        assert!(mapped.properties.is_empty());
    }

    #[test]
    fn unsupported_type_rejects_record() {
        let schema = schema(&[("Name", "title"), ("Tags", "multi_select")]);
        let err = map_record_to_properties(
            &record(json!({"Name": "x", "Tags": "a"})),
            &schema,
            &no_people(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SinkError::UnsupportedPropertyType { ref property, ref kind }
                if property == "Tags" && kind == "multi_select"
        ));

        // An unsupported property without a value is not an error.
        assert!(
            map_record_to_properties(&record(json!({"Name": "x"})), &schema, &no_people())
                .is_ok()
        );
    }

    #[test]
    fn wrong_value_shape_is_not_coerced() {
        let schema = schema(&[("Name", "title"), ("Score", "number")]);
        let err =
            map_record_to_properties(&record(json!({"Score": "5"})), &schema, &no_people())
                .unwrap_err();
        assert!(matches!(err, SinkError::InvalidPayload(_)));

        let err = map_record_to_properties(&record(json!({"Name": 7})), &schema, &no_people())
            .unwrap_err();
        assert!(matches!(err, SinkError::InvalidPayload(_)));
    }

    #[test]
    fn display_name_differs_from_key() {
        let schema = TargetSchema::new(vec![SchemaProperty {
            key: "title".into(),
            name: "Task name".into(),
            id: Some("title".into()),
            kind: PropertyType::Title,
        }]);
        let mapped = map_record_to_properties(
            &record(json!({"Task name": "Ship it"})),
            &schema,
            &no_people(),
        )
        .unwrap();
        assert_eq!(
            mapped.properties["title"],
            json!({"title": [{"text": {"content": "Ship it"}}]})
        );
        assert_eq!(mapped.title_text(&schema), Some("Ship it".into()));
    }

    #[test]
    fn payload_shapes() {
        let schema = schema(&[("Name", "title")]);
        let mapped =
            map_record_to_properties(&record(json!({"Name": "Alpha"})), &schema, &no_people())
                .unwrap();
        let container = ContainerRef::Database("X".into());

        assert_eq!(
            mapped.create_payload(&container),
            json!({
                "parent": {"database_id": "X"},
                "properties": {"Name": {"title": [{"text": {"content": "Alpha"}}]}}
            })
        );
        assert_eq!(
            mapped.update_payload(),
            json!({"properties": {"Name": {"title": [{"text": {"content": "Alpha"}}]}}})
        );
        assert_eq!(mapped.title_text(&schema), Some("Alpha".into()));
    }
}
