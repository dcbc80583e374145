/// Key layout and encoding utilities for the fjall partitions
///
/// Partition structure:
/// - `jobs`: job:{job_id} -> Job (JSON)
/// - `events`: event:{job_id}:{id:020} -> JobEvent (JSON)
/// - `files`: file:{job_id}:{category}:{relative_path} -> JobFile (JSON)
/// - `permissions`: perm:{job_id}:{seq:020} -> PermissionAction (JSON)
/// - `idempotency`: idem:{tenant}:{key}:{hash} -> job_id (string)
/// - `metadata`: meta:{key} -> value
use crate::ledger::records::FileCategory;

/// Encode a job key: job:{job_id}
pub fn encode_job_key(job_id: &str) -> Vec<u8> {
    format!("job:{job_id}").into_bytes()
}

/// Encode an event key: event:{job_id}:{id:020}
///
/// The zero-padded id keeps lexicographic partition order equal to numeric
/// order, which is what cursor scans rely on.
pub fn encode_event_key(job_id: &str, id: u64) -> Vec<u8> {
    format!("event:{job_id}:{id:020}").into_bytes()
}

/// Encode an event prefix for range scans: event:{job_id}:
pub fn encode_event_prefix(job_id: &str) -> Vec<u8> {
    format!("event:{job_id}:").into_bytes()
}

/// Decode an event key back to (job_id, id)
pub fn decode_event_key(key: &[u8]) -> Option<(String, u64)> {
    let key_str = std::str::from_utf8(key).ok()?;
    let rest = key_str.strip_prefix("event:")?;
    let (job_id, id) = rest.rsplit_once(':')?;
    Some((job_id.to_string(), id.parse().ok()?))
}

/// Encode a file key: file:{job_id}:{category}:{relative_path}
pub fn encode_file_key(job_id: &str, category: FileCategory, relative_path: &str) -> Vec<u8> {
    format!("file:{job_id}:{}:{relative_path}", category.as_str()).into_bytes()
}

/// Encode a file prefix for one job: file:{job_id}:
pub fn encode_file_prefix(job_id: &str) -> Vec<u8> {
    format!("file:{job_id}:").into_bytes()
}

/// Encode a permission key: perm:{job_id}:{seq:020}
pub fn encode_permission_key(job_id: &str, seq: u64) -> Vec<u8> {
    format!("perm:{job_id}:{seq:020}").into_bytes()
}

/// Encode a permission prefix for one job: perm:{job_id}:
pub fn encode_permission_prefix(job_id: &str) -> Vec<u8> {
    format!("perm:{job_id}:").into_bytes()
}

/// Encode an idempotency key: idem:{tenant}:{key}:{hash}
pub fn encode_idem_key(tenant_id: &str, idempotency_key: &str, requirement_hash: &str) -> Vec<u8> {
    format!("idem:{tenant_id}:{idempotency_key}:{requirement_hash}").into_bytes()
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{key}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_key_encoding() {
        assert_eq!(encode_job_key("j1"), b"job:j1");
    }

    #[test]
    fn event_key_round_trip() {
        let key = encode_event_key("j1", 42);
        assert_eq!(key, b"event:j1:00000000000000000042");

        let (job_id, id) = decode_event_key(&key).unwrap();
        assert_eq!(job_id, "j1");
        assert_eq!(id, 42);
    }

    #[test]
    fn event_keys_sort_numerically() {
        let earlier = encode_event_key("j1", 9);
        let later = encode_event_key("j1", 10);
        assert!(earlier < later);
    }

    #[test]
    fn file_key_carries_category() {
        let key = encode_file_key("j1", FileCategory::Output, "report.md");
        assert_eq!(key, b"file:j1:output:report.md");
        assert!(key.starts_with(&encode_file_prefix("j1")));
    }

    #[test]
    fn idem_key_includes_all_parts() {
        let key = encode_idem_key("t1", "k1", "abc123");
        assert_eq!(key, b"idem:t1:k1:abc123");
    }
}
