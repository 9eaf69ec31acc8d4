//! Key schema in the coordination store
//!
//! Every key a job uses lives under `/taskmesh/<job>`:
//!
//! ```text
//! /taskmesh/<job>/version                      layout version string
//! /taskmesh/<job>/epoch                        current epoch, UTF-8 decimal
//! /taskmesh/<job>/slots/<slot>/owner           "empty" or host:port
//! /taskmesh/<job>/slots/<slot>/meta/<link>/<epoch>   latest meta-notification
//! ```
//!
//! Only this module formats paths; every other component addresses the store
//! through a [`StoreLayout`].

use crate::topology::LinkType;

/// Written at `<job>/version` when the controller creates the layout.
pub const LAYOUT_VERSION: &str = "1";

/// Sentinel value of an unassigned owner record.
pub const EMPTY_OWNER: &str = "empty";

const ROOT_PREFIX: &str = "/taskmesh";

/// Path builder for one job's namespace.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: String,
}

impl StoreLayout {
    pub fn new(job: &str) -> Self {
        Self {
            root: format!("{}/{}", ROOT_PREFIX, job),
        }
    }

    /// The job namespace root, the unit of recursive teardown.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn version_key(&self) -> String {
        format!("{}/version", self.root)
    }

    pub fn epoch_key(&self) -> String {
        format!("{}/epoch", self.root)
    }

    pub fn owner_key(&self, slot: u64) -> String {
        format!("{}/slots/{}/owner", self.root, slot)
    }

    pub fn meta_key(&self, slot: u64, link: LinkType, epoch: u64) -> String {
        format!("{}/slots/{}/meta/{}/{}", self.root, slot, link, epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = StoreLayout::new("train");
        assert_eq!(layout.root(), "/taskmesh/train");
        assert_eq!(layout.version_key(), "/taskmesh/train/version");
        assert_eq!(layout.epoch_key(), "/taskmesh/train/epoch");
        assert_eq!(layout.owner_key(3), "/taskmesh/train/slots/3/owner");
        assert_eq!(
            layout.meta_key(3, LinkType::Child, 7),
            "/taskmesh/train/slots/3/meta/Child/7"
        );
    }
}
