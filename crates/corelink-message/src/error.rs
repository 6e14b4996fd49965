use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("message length inconsistent with header")]
    Length,
    #[error("message magic mismatch")]
    Magic,
    #[error("unsupported archive kind for this payload")]
    ArchiveKind,
    #[error("portable-binary codec: {0}")]
    PortableBinary(#[from] bitcode::Error),
    #[error("binary codec: {0}")]
    Binary(#[from] bincode::Error),
    #[error("text codec: {0}")]
    Text(#[from] serde_json::Error),
    #[error("xml codec: {0}")]
    Xml(#[from] serde_xml_rs::Error),
}
