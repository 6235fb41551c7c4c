//! Logging shortcuts for the listener handlers.

/// Just to keep the handlers readable.
macro_rules! log_receive(
    ($message:expr, $source:expr, $interface:expr) => (
        info!(
            "Received {} from {} ({}) on {}",
            $message.kind(),
            $message.client_hardware_address.to_hex_string(),
            $source,
            $interface
        );
        debug!("{}", $message);
    );
);

/// Just to keep the handlers readable.
macro_rules! log_send(
    ($message:expr, $destination:expr, $interface:expr) => (
        info!(
            "Sending {} with {} to {} via {}",
            $message.kind(),
            $message.your_ip_address,
            $destination,
            $interface
        );
        debug!("{}", $message);
    );
);
