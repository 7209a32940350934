/// Extracts the first `anonymousId` value from a prepared batch payload with
/// a literal scan. The payload is an opaque blob of already-serialised JSON,
/// so a full parse would be wasted work; ids never contain escaped quotes.
pub fn extract_anonymous_id(batch: &str) -> Option<String> {
    const KEY: &str = "\"anonymousId\"";

    let after_key = &batch[batch.find(KEY)? + KEY.len()..];
    let after_colon = after_key.trim_start().strip_prefix(':')?;
    let value = after_colon.trim_start().strip_prefix('"')?;
    let end = value.find('"')?;
    let id = &value[..end];

    (!id.is_empty()).then(|| id.to_string())
}
