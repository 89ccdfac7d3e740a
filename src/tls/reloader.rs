//! Atomic holder of the current credential bundle.
//!
//! Readers take a cheap `Arc` snapshot with [`Reloader::current`] and are
//! never blocked by a reload. A reload builds the new bundle outside any lock
//! and then swaps it in whole, so a snapshot is always one complete
//! generation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::TlsSettings;
use crate::tls::bundle::{build_bundle, BundleSummary, CredentialBundle};
use crate::tls::error::TlsResult;

/// Generation number of the bundle built at construction.
pub const INITIAL_GENERATION: u64 = 1;

struct Published {
    generation: u64,
    bundle: Arc<CredentialBundle>,
}

/// Owns the settings and the published bundle.
pub struct Reloader {
    settings: TlsSettings,
    published: ArcSwap<Published>,
    next_generation: AtomicU64,
}

impl std::fmt::Debug for Reloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reloader")
            .field("generation", &self.generation())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Reloader {
    /// Build the first bundle. Fails if it cannot be built.
    pub fn new(settings: TlsSettings) -> TlsResult<Self> {
        let bundle = build_bundle(&settings)?;
        Ok(Self {
            settings,
            published: ArcSwap::from_pointee(Published {
                generation: INITIAL_GENERATION,
                bundle: Arc::new(bundle),
            }),
            next_generation: AtomicU64::new(INITIAL_GENERATION + 1),
        })
    }

    /// Snapshot of the published bundle.
    pub fn current(&self) -> Arc<CredentialBundle> {
        Arc::clone(&self.published.load().bundle)
    }

    /// Generation number of the published bundle.
    pub fn generation(&self) -> u64 {
        self.published.load().generation
    }

    /// Summary of the published bundle and its generation, taken from one snapshot.
    pub fn summary(&self) -> BundleSummary {
        let published = self.published.load();
        published.bundle.summary(published.generation)
    }

    pub fn settings(&self) -> &TlsSettings {
        &self.settings
    }

    /// Rebuild from disk and publish on success.
    ///
    /// On failure the published bundle is untouched. Each call takes a
    /// generation number before it starts building; when builds overlap,
    /// the one that started last is the one that stays published, whatever
    /// order they finish in. Returns the generation published afterwards.
    pub fn reload(&self) -> TlsResult<u64> {
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel);
        let bundle = Arc::new(build_bundle(&self.settings)?);

        let candidate = Arc::new(Published { generation, bundle });
        let previous = self.published.rcu(|current| {
            if current.generation < generation {
                Arc::clone(&candidate)
            } else {
                Arc::clone(current)
            }
        });

        Ok(previous.generation.max(generation))
    }
}
