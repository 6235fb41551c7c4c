//! BOOTP/DHCP message constants.

/// `client_hardware_address` size in bytes.
pub const SIZE_HARDWARE_ADDRESS: usize = 16;

/// The size of a MAC-48 address, the only hardware address kind the bridge answers.
pub const SIZE_MAC48: usize = 6;

/// `server_name` size in bytes.
pub const SIZE_SERVER_NAME: usize = 64;

/// `boot_filename` size in bytes.
pub const SIZE_BOOT_FILENAME: usize = 128;

/// The `client_hardware_address` field offset in bytes.
pub const OFFSET_HARDWARE_ADDRESS: usize = 28;

/// The `server_name` field offset in bytes.
pub const OFFSET_SERVER_NAME: usize = OFFSET_HARDWARE_ADDRESS + SIZE_HARDWARE_ADDRESS;

/// The `boot_filename` field offset in bytes.
pub const OFFSET_BOOT_FILENAME: usize = OFFSET_SERVER_NAME + SIZE_SERVER_NAME;

/// DHCP options magic cookie offset in bytes.
pub const OFFSET_MAGIC_COOKIE: usize = OFFSET_BOOT_FILENAME + SIZE_BOOT_FILENAME;

/// DHCP options themselves offset in bytes.
pub const OFFSET_OPTIONS: usize = OFFSET_MAGIC_COOKIE + ::std::mem::size_of::<u32>();

/// The fixed part of a message including the magic cookie.
pub const SIZE_HEADER_MINIMAL: usize = OFFSET_OPTIONS;

/// The tag and length octets.
pub const SIZE_OPTION_PREFIX: usize = 2;

/// The longest value a single option can carry.
pub const SIZE_OPTION_MAXIMAL: usize = 255;

/// Only the highest bit of the `flags` field is used in DHCP.
pub const FLAG_BROADCAST: u16 = 0b1000_0000_0000_0000;

/// The magic number before the DHCP options.
pub const MAGIC_COOKIE: u32 = 0x6382_5363;

/// The minimal message size the client MUST be able to accept.
pub const SIZE_MESSAGE_MINIMAL: usize = 576;

/// The well-known server port.
pub const DHCP_PORT_SERVER: u16 = 67;

/// The well-known client port.
pub const DHCP_PORT_CLIENT: u16 = 68;

/// The class identifier prefix sent by PXE boot ROMs and echoed by PXE servers.
pub const PXE_CLIENT_CLASS: &str = "PXEClient";
