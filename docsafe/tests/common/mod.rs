#![allow(dead_code)]

use docsafe::{memory::InMemoryStore, prelude::*};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Record)]
pub struct Post {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub published: bool,
}

impl Post {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            published: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Record)]
pub struct Account {
    pub id: Option<String>,
    pub owner: String,
    pub balance: i64,
}

impl Account {
    pub fn new(id: &str, owner: &str, balance: i64) -> Self {
        Self {
            id: Some(id.into()),
            owner: owner.into(),
            balance,
        }
    }
}

pub fn store() -> (InMemoryStore, DocumentStore) {
    let backend = InMemoryStore::new();
    (backend.clone(), DocumentStore::new(backend))
}
