/// Interval between heartbeat pings while connected: 3 seconds.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 3;
/// Delay before reconnecting after a close or error: 5 seconds.
pub const RECONNECT_DELAY_SECS: u64 = 5;
/// How long a key fetch may stay unanswered before its queued work fails.
pub const KEY_REQUEST_TIMEOUT_SECS: u64 = 10;
/// Title given to conversations created by an incoming message.
pub const UNKNOWN_CHAT_TITLE: &str = "Unknown chat";
/// Action tag included in every signed message payload.
pub const SEND_TEXT_ACTION: &str = "sendTxt";
/// Smallest RSA modulus accepted for the encryption keypair.
pub const MIN_RSA_KEY_BITS: usize = 2048;
/// RSA modulus used for newly generated identities.
pub const DEFAULT_RSA_KEY_BITS: usize = 4096;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_is_slower_than_heartbeat() {
        assert!(RECONNECT_DELAY_SECS > HEARTBEAT_INTERVAL_SECS);
    }

    #[test]
    fn default_rsa_bits_meet_minimum() {
        assert!(DEFAULT_RSA_KEY_BITS >= MIN_RSA_KEY_BITS);
    }
}
