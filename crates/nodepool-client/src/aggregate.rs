use serde_json::Value;

/// Most frequent value, ties going to the value seen first.
///
/// Returns `None` for an empty input.
///
/// # Example
///
/// ```
/// use nodepool_client::aggregate::majority;
///
/// assert_eq!(majority(&["a", "b", "a"]), Some(&"a"));
/// assert_eq!(majority(&["a", "b"]), Some(&"a"));
/// ```
pub fn majority<T: PartialEq>(values: &[T]) -> Option<&T> {
    // (first index, count) per distinct value, in first-seen order
    let mut tally: Vec<(usize, usize)> = Vec::new();
    for (index, value) in values.iter().enumerate() {
        match tally.iter_mut().find(|(first, _)| values[*first] == *value) {
            Some((_, count)) => *count += 1,
            None => tally.push((index, 1)),
        }
    }

    let mut best: Option<(usize, usize)> = None;
    for (first, count) in tally {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((first, count));
        }
    }
    best.map(|(first, _)| &values[first])
}

/// Majority of one field across node responses.
///
/// Responses without the field count as `null`.
pub fn majority_field(results: &[Value], key: &str) -> Option<Value> {
    let values: Vec<Value> = results
        .iter()
        .map(|result| result.get(key).cloned().unwrap_or(Value::Null))
        .collect();
    majority(&values).cloned()
}

/// Transposes per-node batch replies into per-item result lists.
///
/// Each node reply holds one entry per item, either directly (`key` is
/// `None`) or under `reply[key]`. Entry `i` of the output lists every node's
/// answer for item `i`, in reply order. Indexes of replies with the wrong
/// shape are returned alongside so the caller can attribute them.
pub(crate) fn transpose(
    replies: &[Value],
    key: Option<&str>,
    item_count: usize,
) -> (Vec<Vec<Value>>, Vec<usize>) {
    let mut per_item = vec![Vec::new(); item_count];
    let mut malformed = Vec::new();

    for (index, reply) in replies.iter().enumerate() {
        let entries = match key {
            Some(key) => reply.get(key),
            None => Some(reply),
        }
        .and_then(Value::as_array)
        .filter(|entries| entries.len() == item_count);

        match entries {
            Some(entries) => {
                for (item, entry) in per_item.iter_mut().zip(entries) {
                    item.push(entry.clone());
                }
            }
            None => malformed.push(index),
        }
    }

    (per_item, malformed)
}
