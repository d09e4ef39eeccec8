use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to map shared memory region: {0}")]
    Mmap(#[from] nix::Error),

    #[error("requested mmap region size {requested} exceeds backing size {backing}")]
    RegionTooLarge { requested: usize, backing: usize },
}

pub type Result<T> = std::result::Result<T, CacheError>;
