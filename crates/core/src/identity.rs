use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hashes a canonically ordered field map into UUID space. The store keys
/// every object by UUID, so identical fields must land on the identical id.
pub fn deterministic_id(fields: &BTreeMap<&str, String>) -> Uuid {
    let mut hasher = Sha256::new();
    for (key, value) in fields {
        hasher.update(key.as_bytes());
        hasher.update([0x1f]);
        hasher.update(value.as_bytes());
        hasher.update([0x1e]);
    }
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

pub fn parent_page_id(document_id: &str, page: u32) -> Uuid {
    let mut fields = BTreeMap::new();
    fields.insert("kind", "parent-page".to_string());
    fields.insert("document", document_id.to_string());
    fields.insert("page", page.to_string());
    deterministic_id(&fields)
}

pub fn child_chunk_id(document_id: &str, page: u32, chunk_index: u32) -> Uuid {
    let mut fields = BTreeMap::new();
    fields.insert("kind", "child-chunk".to_string());
    fields.insert("document", document_id.to_string());
    fields.insert("page", page.to_string());
    fields.insert("chunk", chunk_index.to_string());
    deterministic_id(&fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_fields_map_to_the_identical_id() {
        let first = parent_page_id("doc-1", 3);
        let second = parent_page_id("doc-1", 3);
        assert_eq!(first, second);
    }

    #[test]
    fn any_field_change_moves_the_id() {
        let base = child_chunk_id("doc-1", 3, 0);
        assert_ne!(base, child_chunk_id("doc-2", 3, 0));
        assert_ne!(base, child_chunk_id("doc-1", 4, 0));
        assert_ne!(base, child_chunk_id("doc-1", 3, 1));
    }

    #[test]
    fn parent_and_child_ids_never_collide() {
        let parent = parent_page_id("doc-1", 3);
        let child = child_chunk_id("doc-1", 3, 0);
        assert_ne!(parent, child);
    }

    #[test]
    fn ids_are_well_formed_uuids() {
        let id = parent_page_id("doc-1", 1);
        assert_eq!(id.get_version_num(), 4);
        let parsed = Uuid::parse_str(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn key_order_does_not_matter() {
        let mut forward = BTreeMap::new();
        forward.insert("alpha", "1".to_string());
        forward.insert("beta", "2".to_string());

        let mut reverse = BTreeMap::new();
        reverse.insert("beta", "2".to_string());
        reverse.insert("alpha", "1".to_string());

        assert_eq!(deterministic_id(&forward), deterministic_id(&reverse));
    }
}
