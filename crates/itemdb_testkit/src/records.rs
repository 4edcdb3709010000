//! Sample record types shared by the integration suites and benches.

use itemdb_core::{
    Attribute, DeletePolicy, Fields, Record, Schema, StoreId, StoreResult, Value,
};

/// A name and a phone number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// Display name.
    pub name: String,
    /// Phone number.
    pub number: String,
}

impl Contact {
    /// Creates a contact.
    pub fn new(name: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            number: number.into(),
        }
    }
}

impl Record for Contact {
    const TYPE_NAME: &'static str = "contact";

    fn schema() -> Schema {
        Schema::new(Self::TYPE_NAME, Self::SCHEMA_VERSION)
            .attribute(Attribute::text("name").indexed().not_null())
            .attribute(Attribute::text("number").not_null())
    }

    fn encode(&self) -> Vec<Value> {
        vec![self.name.clone().into(), self.number.clone().into()]
    }

    fn decode(values: &[Value]) -> StoreResult<Self> {
        let mut fields = Fields::new(values);
        Ok(Self {
            name: fields.text()?,
            number: fields.text()?,
        })
    }
}

/// A person with an optional age.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    /// Name.
    pub name: String,
    /// Age in years.
    pub age: Option<i64>,
}

impl Person {
    /// Creates a person.
    pub fn new(name: impl Into<String>, age: Option<i64>) -> Self {
        Self {
            name: name.into(),
            age,
        }
    }
}

impl Record for Person {
    const TYPE_NAME: &'static str = "person";

    fn schema() -> Schema {
        Schema::new(Self::TYPE_NAME, Self::SCHEMA_VERSION)
            .attribute(Attribute::text("name").indexed().not_null())
            .attribute(Attribute::integer("age"))
    }

    fn encode(&self) -> Vec<Value> {
        vec![self.name.clone().into(), self.age.into()]
    }

    fn decode(values: &[Value]) -> StoreResult<Self> {
        let mut fields = Fields::new(values);
        Ok(Self {
            name: fields.text()?,
            age: fields.opt_integer()?,
        })
    }
}

/// A pet; deleting its owner deletes the pet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pet {
    /// Name.
    pub name: String,
    /// Owning [`Person`].
    pub owner: Option<StoreId>,
}

impl Record for Pet {
    const TYPE_NAME: &'static str = "pet";

    fn schema() -> Schema {
        Schema::new(Self::TYPE_NAME, Self::SCHEMA_VERSION)
            .attribute(Attribute::text("name").not_null())
            .attribute(
                Attribute::reference("owner")
                    .target(Person::TYPE_NAME)
                    .when_deleted(DeletePolicy::Cascade)
                    .indexed(),
            )
    }

    fn encode(&self) -> Vec<Value> {
        vec![self.name.clone().into(), self.owner.into()]
    }

    fn decode(values: &[Value]) -> StoreResult<Self> {
        let mut fields = Fields::new(values);
        Ok(Self {
            name: fields.text()?,
            owner: fields.reference()?,
        })
    }
}

/// A document that cannot be deleted while a [`Note`] points at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Title.
    pub title: String,
}

impl Record for Document {
    const TYPE_NAME: &'static str = "document";

    fn schema() -> Schema {
        Schema::new(Self::TYPE_NAME, Self::SCHEMA_VERSION).attribute(Attribute::text("title"))
    }

    fn encode(&self) -> Vec<Value> {
        vec![self.title.clone().into()]
    }

    fn decode(values: &[Value]) -> StoreResult<Self> {
        Ok(Self {
            title: Fields::new(values).text()?,
        })
    }
}

/// A note pinned to a [`Document`] and optionally tagged with a [`Person`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    /// Body text.
    pub body: String,
    /// The document; deleting it is refused while the note exists.
    pub document: Option<StoreId>,
    /// The author; cleared when the person is deleted.
    pub author: Option<StoreId>,
}

impl Record for Note {
    const TYPE_NAME: &'static str = "note";

    fn schema() -> Schema {
        Schema::new(Self::TYPE_NAME, Self::SCHEMA_VERSION)
            .attribute(Attribute::text("body"))
            .attribute(
                Attribute::reference("document")
                    .target(Document::TYPE_NAME)
                    .when_deleted(DeletePolicy::Disallow),
            )
            .attribute(Attribute::reference("author").target(Person::TYPE_NAME))
    }

    fn encode(&self) -> Vec<Value> {
        vec![self.body.clone().into(), self.document.into(), self.author.into()]
    }

    fn decode(values: &[Value]) -> StoreResult<Self> {
        let mut fields = Fields::new(values);
        Ok(Self {
            body: fields.text()?,
            document: fields.reference()?,
            author: fields.reference()?,
        })
    }
}

/// A labelled integer with a nullable rank, for sorting and aggregates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    /// Label.
    pub label: String,
    /// Sort key; ties and nulls are expected.
    pub rank: Option<i64>,
    /// Running count.
    pub count: i64,
}

impl Counter {
    /// Creates a counter at zero.
    pub fn new(label: impl Into<String>, rank: Option<i64>) -> Self {
        Self {
            label: label.into(),
            rank,
            count: 0,
        }
    }
}

impl Record for Counter {
    const TYPE_NAME: &'static str = "counter";

    fn schema() -> Schema {
        Schema::new(Self::TYPE_NAME, Self::SCHEMA_VERSION)
            .attribute(Attribute::text("label").not_null())
            .attribute(Attribute::integer("rank").indexed())
            .attribute(Attribute::integer("count").not_null().with_default(0))
    }

    fn encode(&self) -> Vec<Value> {
        vec![self.label.clone().into(), self.rank.into(), self.count.into()]
    }

    fn decode(values: &[Value]) -> StoreResult<Self> {
        let mut fields = Fields::new(values);
        Ok(Self {
            label: fields.text()?,
            rank: fields.opt_integer()?,
            count: fields.integer()?,
        })
    }
}

/// One attribute of every kind, for round-trip checks.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Integer.
    pub whole: i64,
    /// Optional real.
    pub ratio: Option<f64>,
    /// Text.
    pub label: String,
    /// Optional text.
    pub note: Option<String>,
    /// Bytes.
    pub blob: Vec<u8>,
    /// Boolean.
    pub flag: bool,
    /// Optional timestamp in microseconds.
    pub at: Option<i64>,
    /// Optional reference.
    pub link: Option<StoreId>,
}

impl Record for Sample {
    const TYPE_NAME: &'static str = "sample";

    fn schema() -> Schema {
        Schema::new(Self::TYPE_NAME, Self::SCHEMA_VERSION)
            .attribute(Attribute::integer("whole").not_null())
            .attribute(Attribute::real("ratio"))
            .attribute(Attribute::text("label").not_null())
            .attribute(Attribute::text("note"))
            .attribute(Attribute::bytes("blob").not_null())
            .attribute(Attribute::boolean("flag").not_null())
            .attribute(Attribute::timestamp("at"))
            .attribute(Attribute::reference("link"))
    }

    fn encode(&self) -> Vec<Value> {
        vec![
            self.whole.into(),
            self.ratio.into(),
            self.label.clone().into(),
            self.note.clone().into(),
            self.blob.clone().into(),
            self.flag.into(),
            self.at.into(),
            self.link.into(),
        ]
    }

    fn decode(values: &[Value]) -> StoreResult<Self> {
        let mut fields = Fields::new(values);
        Ok(Self {
            whole: fields.integer()?,
            ratio: fields.opt_real()?,
            label: fields.text()?,
            note: fields.opt_text()?,
            blob: fields.bytes()?,
            flag: fields.boolean()?,
            at: fields.opt_integer()?,
            link: fields.reference()?,
        })
    }
}
