use super::types::Example;
use crate::error::Result;
use crate::store::{Memo, Serializer, Store};

const EXAMPLES_KEY: &str = "____examples";

/// One unit of work handed to a worker: an ordered list of examples stored
/// under a single reserved key within the bucket's own scope.
pub struct BucketStore {
    store: Store,
    examples: Option<Memo<Vec<Example>>>,
}

impl BucketStore {
    pub fn open(uri: &str, serializer: Serializer, scope: &str) -> Result<Self> {
        Ok(Self {
            store: Store::open(uri, serializer, scope)?,
            examples: None,
        })
    }

    pub fn examples(&mut self) -> Result<Vec<Example>> {
        if let Some(memo) = self.examples.as_ref().filter(|m| m.fresh(&self.store)) {
            return Ok(memo.value.clone());
        }

        let examples: Vec<Example> = self.store.get(EXAMPLES_KEY)?.unwrap_or_default();
        self.examples = Some(Memo::new(examples.clone(), self.store.generation()));
        Ok(examples)
    }

    /// An empty set deletes the key so "no examples" and "key absent" stay
    /// equivalent for existence checks.
    pub fn set_examples(&mut self, examples: &[Example]) -> Result<()> {
        if examples.is_empty() {
            self.store.delete(&[EXAMPLES_KEY.to_string()])?;
        } else {
            self.store.set(EXAMPLES_KEY, &examples)?;
        }

        self.examples = Some(Memo::new(examples.to_vec(), self.store.generation()));
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.examples = None;
        self.store.clear()
    }

    pub fn reload(&mut self) {
        self.examples = None;
        self.store.reload();
    }
}
