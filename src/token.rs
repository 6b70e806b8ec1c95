//! Session tokens and the [`TokenRegistry`] that issues, validates, and
//! expires them.
//!
//! Each [`Token`] owns a single periodic timer loop (`tokenTimeout` = 60s).
//! On every tick it checks `used_since_last_tick`: if true, it clears the
//! flag and rearms; if false, it marks itself invalid, releases its own
//! mutex, and *then* invokes the eviction callback supplied at
//! construction. The callback is a closure captured at `Token::issue` time
//! rather than a back-pointer to the registry, so there is no ownership
//! cycle between `Token` and `TokenRegistry`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::error::NozzleError;
use crate::metrics::{record_token_evicted, record_token_issued};

const TOKEN_LENGTH: usize = 15;
const TOKEN_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890";
const TOKEN_TIMEOUT: Duration = Duration::from_secs(60);

/// Draws a `TOKEN_LENGTH`-character string from the alphanumeric alphabet.
pub fn generate_token_string() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LENGTH)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

struct TokenState {
    valid: bool,
    used_since_last_tick: bool,
}

/// An opaque session token with an idle-timeout eviction timer.
pub struct Token {
    pub value: String,
    state: Mutex<TokenState>,
}

impl Token {
    /// Creates a token, starts its timer loop, and returns it wrapped in an
    /// `Arc` so the timer task and the registry can share ownership. The
    /// timer is armed before this returns, so no caller can observe a
    /// half-constructed token.
    fn spawn(on_timeout: impl Fn(Arc<Token>) + Send + Sync + 'static) -> Arc<Token> {
        let token = Arc::new(Token {
            value: generate_token_string(),
            state: Mutex::new(TokenState {
                valid: true,
                used_since_last_tick: false,
            }),
        });

        let timer_token = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TOKEN_TIMEOUT);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;

                let mut guard = timer_token.state.lock();
                if guard.used_since_last_tick {
                    guard.used_since_last_tick = false;
                    drop(guard);
                    continue;
                }

                guard.valid = false;
                drop(guard);
                on_timeout(timer_token.clone());
                return;
            }
        });

        token
    }

    pub fn is_valid(&self) -> bool {
        self.state.lock().valid
    }

    /// Marks the token used-since-last-tick if it is still valid.
    pub fn use_token(&self) -> Result<(), NozzleError> {
        let mut guard = self.state.lock();
        if guard.valid {
            guard.used_since_last_tick = true;
            Ok(())
        } else {
            Err(NozzleError::InvalidToken(self.value.clone()))
        }
    }
}

/// Thread-safe map from token string to live [`Token`]. Token-internal
/// mutexes are always released before this registry's own mutex is taken,
/// so the eviction callback (which removes the entry from this map) cannot
/// deadlock with a concurrent `use_token`.
#[derive(Default)]
pub struct TokenRegistry {
    tokens: Mutex<HashMap<String, Arc<Token>>>,
}

impl TokenRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(TokenRegistry {
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Generates a token, arms its eviction timer, and inserts it into the
    /// registry. Insertion and the self-contained eviction callback are
    /// serialized against concurrent removals via the registry mutex.
    pub fn issue(self: &Arc<Self>) -> Arc<Token> {
        let registry = self.clone();
        let token = Token::spawn(move |evicted| {
            registry.on_timeout(&evicted);
        });

        self.tokens.lock().insert(token.value.clone(), token.clone());
        record_token_issued();
        token
    }

    pub fn lookup(&self, value: &str) -> Option<Arc<Token>> {
        self.tokens.lock().get(value).cloned()
    }

    /// Eviction callback invoked by a token's timer loop after it has
    /// transitioned to invalid. Removes the entry from the registry map.
    fn on_timeout(&self, token: &Token) {
        let mut guard = self.tokens.lock();
        tracing::debug!(token = %token.value, "evicting idle token");
        guard.remove(&token.value);
        drop(guard);
        record_token_evicted();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }
}
