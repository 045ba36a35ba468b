use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::RngCore;
use url::Url;

use super::{log_prefix, Clock, SystemClock, TokenError, TokenPolicy, TokenRecord};
use super::{MAX_TOKEN_LEN, TOKEN_BYTES};

/// Minimum gap between purges triggered by a full store.
const FULL_PURGE_INTERVAL_MS: i64 = 1_000;

/// Shared in-memory token store.
///
/// Cloning is cheap; all clones see the same records. Per-token
/// check-then-increment runs while holding the DashMap shard write lock, so
/// concurrent resolutions of one token can never push `access_count` past
/// `max_access`.
#[derive(Clone)]
pub struct TokenStore {
    records: Arc<DashMap<String, TokenRecord>>,
    policy: TokenPolicy,
    clock: Arc<dyn Clock>,
    /// Earliest time (unix millis) a full store may purge again.
    next_full_purge: Arc<AtomicI64>,
}

impl TokenStore {
    pub fn new(policy: TokenPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: TokenPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            policy,
            clock,
            next_full_purge: Arc::new(AtomicI64::new(i64::MIN)),
        }
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    /// Mint a new token granting access to `original_url`.
    pub fn issue(&self, original_url: &str) -> Result<String, TokenError> {
        let original_url = original_url.trim();
        if original_url.is_empty() {
            return Err(TokenError::MalformedInput);
        }
        match Url::parse(original_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") && u.host_str().is_some() => {}
            _ => return Err(TokenError::MalformedInput),
        }

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.policy.ttl)
            .ok_or(TokenError::ExpiryOutOfRange)?;

        if self.records.len() >= self.policy.capacity {
            let purged = self.purge_if_due(now.timestamp_millis());
            if self.records.len() >= self.policy.capacity {
                tracing::warn!(
                    capacity = self.policy.capacity,
                    purged,
                    "token store full, refusing to issue"
                );
                return Err(TokenError::StoreFull);
            }
        }

        let record = TokenRecord {
            original_url: original_url.to_string(),
            issued_at: now,
            expires_at,
            access_count: 0,
            max_access: self.policy.max_access,
        };

        loop {
            let token = generate_token();
            if let Entry::Vacant(slot) = self.records.entry(token.clone()) {
                slot.insert(record);
                tracing::debug!(token = log_prefix(&token), "issued image token");
                return Ok(token);
            }
        }
    }

    /// Consume one use of `token` and return the URL it grants access to.
    pub fn resolve(&self, token: &str) -> Result<String, TokenError> {
        if !is_well_formed(token) {
            return Err(TokenError::MalformedInput);
        }

        let now = self.clock.now();
        match self.records.entry(token.to_string()) {
            Entry::Vacant(_) => Err(TokenError::NotFound),
            Entry::Occupied(mut slot) => {
                if slot.get().is_expired(now) {
                    slot.remove();
                    tracing::debug!(token = log_prefix(token), "token expired on lookup");
                    return Err(TokenError::Expired);
                }
                let record = slot.get_mut();
                if record.is_exhausted() {
                    return Err(TokenError::AccessLimitExceeded);
                }
                record.access_count += 1;
                Ok(record.original_url.clone())
            }
        }
    }

    /// Copy of the current record, without consuming a use.
    pub fn snapshot(&self, token: &str) -> Option<TokenRecord> {
        self.records.get(token).map(|r| r.value().clone())
    }

    /// Drop every record past its expiry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.records.len())
    }

    /// Purge on behalf of a full store, at most once per
    /// `FULL_PURGE_INTERVAL_MS` across all callers.
    fn purge_if_due(&self, now_ms: i64) -> usize {
        let due = self.next_full_purge.load(Ordering::Acquire);
        if now_ms < due {
            return 0;
        }
        let next = now_ms.saturating_add(FULL_PURGE_INTERVAL_MS);
        if self
            .next_full_purge
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return 0;
        }
        self.purge_expired()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn is_well_formed(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && token.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::ManualClock;
    use chrono::Duration;
    use std::sync::Barrier;

    const URL: &str = "https://api.infip.pro/img/1.png";

    fn store_with_clock(policy: TokenPolicy) -> (TokenStore, ManualClock) {
        let clock = ManualClock::default();
        let store = TokenStore::with_clock(policy, Arc::new(clock.clone()));
        (store, clock)
    }

    #[test]
    fn test_resolve_returns_issued_url() {
        let (store, _) = store_with_clock(TokenPolicy::default());
        let token = store.issue(URL).unwrap();
        assert_eq!(store.resolve(&token).unwrap(), URL);
    }

    #[test]
    fn test_tokens_are_long_random_hex() {
        let (store, _) = store_with_clock(TokenPolicy::default());
        let a = store.issue(URL).unwrap();
        let b = store.issue(URL).unwrap();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.bytes().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_ten_uses_then_access_limit() {
        let (store, _) = store_with_clock(TokenPolicy::default());
        let token = store.issue(URL).unwrap();

        assert_eq!(store.resolve(&token).unwrap(), URL);
        assert_eq!(store.snapshot(&token).unwrap().access_count, 1);

        for _ in 0..9 {
            assert_eq!(store.resolve(&token).unwrap(), URL);
        }
        assert_eq!(store.snapshot(&token).unwrap().access_count, 10);

        assert_eq!(store.resolve(&token), Err(TokenError::AccessLimitExceeded));
        // Exhausted records stay until they expire.
        let record = store.snapshot(&token).unwrap();
        assert_eq!(record.access_count, 10);
    }

    #[test]
    fn test_expired_token_is_purged_on_lookup() {
        let (store, clock) = store_with_clock(TokenPolicy::default());
        let token = store.issue(URL).unwrap();

        clock.advance(Duration::minutes(30) + Duration::seconds(1));

        assert_eq!(store.resolve(&token), Err(TokenError::Expired));
        assert_eq!(store.resolve(&token), Err(TokenError::NotFound));
        assert!(store.is_empty());
    }

    #[test]
    fn test_expiry_wins_over_remaining_uses() {
        let (store, clock) = store_with_clock(TokenPolicy::default());
        let token = store.issue(URL).unwrap();
        store.resolve(&token).unwrap();

        clock.advance(Duration::hours(1));
        assert_eq!(store.resolve(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_valid_right_up_to_deadline() {
        let (store, clock) = store_with_clock(TokenPolicy::default());
        let token = store.issue(URL).unwrap();

        clock.advance(Duration::minutes(30));
        assert_eq!(store.resolve(&token).unwrap(), URL);
    }

    #[test]
    fn test_purge_expired_removes_only_stale_records() {
        let (store, clock) = store_with_clock(TokenPolicy::default());
        let old = store.issue(URL).unwrap();
        clock.advance(Duration::minutes(20));
        let fresh = store.issue(URL).unwrap();
        clock.advance(Duration::minutes(15));

        assert_eq!(store.purge_expired(), 1);
        assert!(store.snapshot(&old).is_none());
        assert!(store.snapshot(&fresh).is_some());
    }

    #[test]
    fn test_purge_drops_exhausted_records_at_expiry() {
        let policy = TokenPolicy {
            max_access: 1,
            ..TokenPolicy::default()
        };
        let (store, clock) = store_with_clock(policy);
        let token = store.issue(URL).unwrap();
        store.resolve(&token).unwrap();

        assert_eq!(store.purge_expired(), 0);
        clock.advance(Duration::minutes(31));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.resolve(&token), Err(TokenError::NotFound));
    }

    #[test]
    fn test_unknown_token_not_found() {
        let (store, _) = store_with_clock(TokenPolicy::default());
        assert_eq!(store.resolve("deadbeef"), Err(TokenError::NotFound));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let (store, _) = store_with_clock(TokenPolicy::default());
        assert_eq!(store.resolve(""), Err(TokenError::MalformedInput));
        assert_eq!(store.resolve("../etc/passwd"), Err(TokenError::MalformedInput));
        let long = "a".repeat(MAX_TOKEN_LEN + 1);
        assert_eq!(store.resolve(&long), Err(TokenError::MalformedInput));
    }

    #[test]
    fn test_issue_rejects_bad_urls() {
        let (store, _) = store_with_clock(TokenPolicy::default());
        assert_eq!(store.issue(""), Err(TokenError::MalformedInput));
        assert_eq!(store.issue("   "), Err(TokenError::MalformedInput));
        assert_eq!(store.issue("not a url"), Err(TokenError::MalformedInput));
        assert_eq!(store.issue("ftp://api.infip.pro/x.png"), Err(TokenError::MalformedInput));
        assert!(store.is_empty());
    }

    #[test]
    fn test_issue_does_not_check_origin() {
        let (store, _) = store_with_clock(TokenPolicy::default());
        let token = store.issue("https://evil.example.com/x.png").unwrap();
        assert_eq!(store.resolve(&token).unwrap(), "https://evil.example.com/x.png");
    }

    #[test]
    fn test_store_full_until_records_expire() {
        let policy = TokenPolicy {
            capacity: 2,
            ..TokenPolicy::default()
        };
        let (store, clock) = store_with_clock(policy);
        store.issue(URL).unwrap();
        store.issue(URL).unwrap();

        assert_eq!(store.issue(URL), Err(TokenError::StoreFull));

        clock.advance(Duration::minutes(31));
        assert!(store.issue(URL).is_ok());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_full_store_purges_at_most_once_per_interval() {
        let policy = TokenPolicy {
            capacity: 2,
            ..TokenPolicy::default()
        };
        let (store, clock) = store_with_clock(policy);
        let first = store.issue(URL).unwrap();
        clock.advance(Duration::minutes(20));
        store.issue(URL).unwrap();

        // `first` is at its deadline but not past it.
        clock.advance(Duration::minutes(10));
        assert_eq!(store.issue(URL), Err(TokenError::StoreFull));

        // `first` has now expired, but the last purge was too recent.
        clock.advance(Duration::milliseconds(1));
        assert_eq!(store.issue(URL), Err(TokenError::StoreFull));
        assert!(store.snapshot(&first).is_some());

        clock.advance(Duration::seconds(1));
        assert!(store.issue(URL).is_ok());
        assert!(store.snapshot(&first).is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_unrepresentable_expiry_is_an_error() {
        let policy = TokenPolicy {
            ttl: Duration::days(365 * 1_000_000),
            ..TokenPolicy::default()
        };
        let (store, _) = store_with_clock(policy);
        assert_eq!(store.issue(URL), Err(TokenError::ExpiryOutOfRange));
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_resolutions_respect_single_use() {
        let policy = TokenPolicy {
            max_access: 1,
            ..TokenPolicy::default()
        };
        let (store, _) = store_with_clock(policy);
        let token = store.issue(URL).unwrap();

        const N: usize = 32;
        let barrier = Barrier::new(N);
        let results: Vec<Result<String, TokenError>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..N)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        store.resolve(&token)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let limited = results
            .iter()
            .filter(|r| **r == Err(TokenError::AccessLimitExceeded))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(limited, N - 1);
        assert_eq!(store.snapshot(&token).unwrap().access_count, 1);
    }
}
