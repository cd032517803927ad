//! Hand-written schemas shared by unit tests.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, const_mutex};

use crate::{
    CallbackType, Embedded, FieldType, Identifier, Key, KeyField, Mapped, Property,
    PropertyOptions, Schema, StorageDatetime,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Address {
    pub(crate) street: Option<String>,
    pub(crate) city: Option<String>,
}

impl Address {
    pub(crate) fn new(street: &str, city: &str) -> Self {
        Self {
            street: Some(street.to_string()),
            city: Some(city.to_string()),
        }
    }
}

impl Mapped for Address {
    fn schema() -> Schema<Self> {
        Schema::embeddable()
            .instantiate_with(Address::default)
            .field(Property::new("street", |a: &Address| &a.street).writer(|a, v| a.street = v))
            .field(Property::new("city", |a: &Address| &a.city).writer(|a, v| a.city = v))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Contact {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) email: Option<String>,
    pub(crate) address: Option<Address>,
    pub(crate) home: Option<Address>,
    pub(crate) version: i64,
    pub(crate) created_at: Option<StorageDatetime>,
    pub(crate) updated_at: Option<DateTime<Utc>>,
}

impl Mapped for Contact {
    fn schema() -> Schema<Self> {
        Schema::entity()
            .instantiate_with(Contact::default)
            .field(
                Identifier::new("id", |c: &Contact| &c.id)
                    .writer(|c, v| c.id = v)
                    .auto_generated(),
            )
            .field(Property::new("name", |c: &Contact| &c.name).writer(|c, v| c.name = v))
            .field(
                Property::new("email", |c: &Contact| &c.email)
                    .writer(|c, v| c.email = v)
                    .optional(true),
            )
            .field(
                Embedded::new("address", |c: &Contact| c.address.as_ref())
                    .writer(|c, v| c.address = Some(v))
                    .imploded(),
            )
            .field(
                Embedded::new("home", |c: &Contact| c.home.as_ref())
                    .writer(|c, v| c.home = Some(v))
                    .mapped_name("residence"),
            )
            .field(
                Property::new("version", |c: &Contact| &c.version)
                    .writer(|c, v| c.version = v)
                    .version(),
            )
            .field(
                Property::new("created_at", |c: &Contact| &c.created_at)
                    .writer(|c, v| c.created_at = v)
                    .created_timestamp(),
            )
            .field(
                Property::new("updated_at", |c: &Contact| &c.updated_at)
                    .writer(|c, v| c.updated_at = v)
                    .updated_timestamp(),
            )
    }
}

pub(crate) fn contact() -> Contact {
    Contact {
        id: 7,
        name: "Ada".to_string(),
        email: Some("ada@example.com".to_string()),
        address: Some(Address::new("Main", "Springfield")),
        home: Some(Address::new("Elm", "Shelbyville")),
        version: 3,
        created_at: None,
        updated_at: None,
    }
}

/// Numeric id held in a newtype.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct OrderId(i64);

impl OrderId {
    pub(crate) fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub(crate) fn raw(&self) -> &i64 {
        &self.0
    }
}

impl FieldType for OrderId {}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Order {
    pub(crate) id: OrderId,
    pub(crate) item: String,
}

impl Mapped for Order {
    fn schema() -> Schema<Self> {
        Schema::entity()
            .kind("Orders")
            .instantiate_with(Order::default)
            .field(
                Identifier::wrapped("id", |o: &Order| &o.id, OrderId::raw, OrderId::new)
                    .writer(|o, v| o.id = v)
                    .auto_generated(),
            )
            .field(Property::new("item", |o: &Order| &o.item).writer(|o, v| o.item = v))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Point {
    pub(crate) id: String,
    pub(crate) x: i64,
    pub(crate) label: Option<String>,
}

impl Mapped for Point {
    fn schema() -> Schema<Self> {
        Schema::entity()
            .kind("Points")
            .immutable()
            .constructor(&["id", "x", "label"], |args| {
                Ok(Point {
                    id: args.take("id")?,
                    x: args.take("x")?,
                    label: args.take("label")?,
                })
            })
            .field(Identifier::new("id", |p: &Point| &p.id))
            .field(Property::new("x", |p: &Point| &p.x))
            .field(Property::new("label", |p: &Point| &p.label))
    }
}

/// Immutable type whose only constructor misses a field.
#[derive(Debug)]
pub(crate) struct PartialPoint {
    pub(crate) id: String,
    pub(crate) x: i64,
}

impl Mapped for PartialPoint {
    fn schema() -> Schema<Self> {
        Schema::entity()
            .immutable()
            .constructor(&["id"], |args| {
                Ok(PartialPoint {
                    id: args.take("id")?,
                    x: 0,
                })
            })
            .field(Identifier::new("id", |p: &PartialPoint| &p.id))
            .field(Property::new("x", |p: &PartialPoint| &p.x))
    }
}

/// Immutable type whose constructor has a parameter without a name binding.
#[derive(Debug)]
pub(crate) struct UnnamedPoint {
    pub(crate) id: String,
    pub(crate) x: i64,
}

impl Mapped for UnnamedPoint {
    fn schema() -> Schema<Self> {
        Schema::entity()
            .immutable()
            .constructor_with_params(vec![Some("id"), None], |args| {
                Ok(UnnamedPoint {
                    id: args.take("id")?,
                    x: 0,
                })
            })
            .field(Identifier::new("id", |p: &UnnamedPoint| &p.id))
            .field(Property::new("x", |p: &UnnamedPoint| &p.x))
    }
}

pub(crate) static DOCUMENT_EVENTS: Mutex<Vec<&'static str>> = const_mutex(Vec::new());

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Audit {
    pub(crate) created_by: Option<String>,
    pub(crate) revision: i64,
}

impl Mapped for Audit {
    fn schema() -> Schema<Self> {
        Schema::mapped_superclass()
            .field(
                Property::new("created_by", |a: &Audit| &a.created_by)
                    .writer(|a, v| a.created_by = v),
            )
            .field(
                Property::new("revision", |a: &Audit| &a.revision)
                    .writer(|a, v| a.revision = v)
                    .version(),
            )
            .listener(CallbackType::PreInsert, |_audit: &Audit| {
                DOCUMENT_EVENTS.lock().push("audit");
                Ok(())
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Document {
    pub(crate) audit: Audit,
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) key: Option<Key>,
    pub(crate) parent: Option<Key>,
}

impl Mapped for Document {
    fn schema() -> Schema<Self> {
        Schema::entity()
            .kind("Doc")
            .instantiate_with(Document::default)
            .inherit(|d: &Document| &d.audit, |d: &mut Document| &mut d.audit)
            .property_override(
                "created_by",
                PropertyOptions::new().name("author").indexed(false),
            )
            .field(Identifier::new("id", |d: &Document| &d.id).writer(|d, v| d.id = v))
            .field(Property::new("title", |d: &Document| &d.title).writer(|d, v| d.title = v))
            .field(KeyField::key("key", |d: &Document| &d.key).writer(|d, v| d.key = v))
            .field(KeyField::parent("parent", |d: &Document| &d.parent).writer(|d, v| d.parent = v))
            .listener(CallbackType::PreInsert, |document: &Document| {
                if document.title == "reject" {
                    return Err("title rejected".into());
                }
                DOCUMENT_EVENTS.lock().push("document");
                Ok(())
            })
    }
}
