use crate::cbor::Map;
use thiserror::Error;

/// Why a resource refused an update request. The registry answers 4.00.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpdateError {
    #[error("missing field '{0}'")]
    MissingField(String),

    #[error("field '{field}' must be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    #[error("update rejected: {0}")]
    Rejected(String),
}

/// Per-resource "on update" behavior. It receives the resource's cached
/// representation and the decoded request body, and mutates the cache.
pub trait UpdateHandler: Send {
    fn on_update(&mut self, representation: &mut Map, update: &Map) -> Result<(), UpdateError>;
}

impl<F> UpdateHandler for F
where
    F: FnMut(&mut Map, &Map) -> Result<(), UpdateError> + Send,
{
    fn on_update(&mut self, representation: &mut Map, update: &Map) -> Result<(), UpdateError> {
        self(representation, update)
    }
}

/// A resource registered with the [`super::OicServer`]. The path is fixed at
/// construction; only the representation changes afterwards.
pub struct OicResource {
    path: String,
    resource_type: String,
    interfaces: Vec<String>,
    representation: Map,
    handler: Box<dyn UpdateHandler>,
}

impl OicResource {
    pub fn new(
        path: impl Into<String>,
        resource_type: impl Into<String>,
        interface: impl Into<String>,
        handler: impl UpdateHandler + 'static,
        initial: Map,
    ) -> Self {
        Self {
            path: path.into(),
            resource_type: resource_type.into(),
            interfaces: vec![interface.into()],
            representation: initial,
            handler: Box::new(handler),
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    pub fn representation(&self) -> &Map {
        &self.representation
    }

    /// Run the update behavior against the cached representation. On error
    /// the cache is left as it was.
    pub fn apply_update(&mut self, update: &Map) -> Result<(), UpdateError> {
        let mut staged = self.representation.clone();
        self.handler.on_update(&mut staged, update)?;
        self.representation = staged;
        Ok(())
    }
}

impl std::fmt::Debug for OicResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OicResource")
            .field("path", &self.path)
            .field("resource_type", &self.resource_type)
            .field("interfaces", &self.interfaces)
            .field("representation", &self.representation)
            .finish_non_exhaustive()
    }
}
