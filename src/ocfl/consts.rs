pub const INVENTORY_FILE: &str = "inventory.json";
pub const INVENTORY_SIDECAR_PREFIX: &str = "inventory.json.";
pub const OCFL_LAYOUT_FILE: &str = "ocfl_layout.json";
pub const EXTENSIONS_DIR: &str = "extensions";
pub const EXTENSIONS_CONFIG_FILE: &str = "config.json";

pub const OCFL_SPEC_URL_BASE: &str = "https://ocfl.io/";

pub const INVENTORY_TYPE_1_0: &str = "https://ocfl.io/1.0/spec/#inventory";
pub const INVENTORY_TYPE_1_1: &str = "https://ocfl.io/1.1/spec/#inventory";

pub const DEFAULT_CONTENT_DIR: &str = "content";

pub const NAMASTE_PREFIX: &str = "0=";
pub const ROOT_NAMASTE_BASE: &str = "ocfl_";
pub const OBJECT_NAMASTE_BASE: &str = "ocfl_object_";
