//! Symbol naming shared by the compiler, the loader and the resolvers.

/// Import namespace for image-wide entities and engine symbols
pub const ENV_MODULE: &str = "env";
/// Import namespace of GOT entries: one immutable global per undefined callee
pub const GOT_MODULE: &str = "got";

pub const MEMORY_SYMBOL: &str = "memory";
pub const TABLE_SYMBOL: &str = "__indirect_function_table";

/// Prefix reserved for engine-internal symbols
pub const INTERNAL_PREFIX: &str = "__mutjit_";
pub const ENTER_FUNCTION_SYMBOL: &str = "__mutjit_enter_function";
pub const LEAVE_FUNCTION_SYMBOL: &str = "__mutjit_leave_function";

const FUNCTION_INDEX_OFFSET_PREFIX: &str = "__mutjit_function_index_offset_";

/// Key of the trampoline owned by `function` of module `module_id`
pub fn trampoline_key(function: &str, module_id: &str) -> String {
    format!("{}_{}", function, module_id)
}

/// Symbol of the cell that holds the live address for `key`
pub fn trampoline_symbol(key: &str) -> String {
    format!("{}_trampoline", key)
}

/// Symbol of the preserved, unmutated body for `key`
pub fn original_symbol(key: &str) -> String {
    format!("{}_original", key)
}

/// Inverse of [`trampoline_symbol`]
pub fn trampoline_key_of(symbol: &str) -> Option<&str> {
    symbol.strip_suffix("_trampoline")
}

pub fn function_index_offset_symbol(module_id: &str) -> String {
    format!("{}{}", FUNCTION_INDEX_OFFSET_PREFIX, module_id)
}

pub fn module_of_function_index_offset(symbol: &str) -> Option<&str> {
    symbol.strip_prefix(FUNCTION_INDEX_OFFSET_PREFIX)
}

pub fn is_internal(symbol: &str) -> bool {
    symbol.starts_with(INTERNAL_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trampoline_names() {
        let key = trampoline_key("count_letters", "letters_0a1b");
        assert_eq!(key, "count_letters_letters_0a1b");
        assert_eq!(
            trampoline_symbol(&key),
            "count_letters_letters_0a1b_trampoline"
        );
        assert_eq!(original_symbol(&key), "count_letters_letters_0a1b_original");
        assert_eq!(trampoline_key_of(&trampoline_symbol(&key)), Some(key.as_str()));
        assert_eq!(trampoline_key_of("count_letters"), None);
    }

    #[test]
    fn test_offset_symbols() {
        let symbol = function_index_offset_symbol("sum_ff00");
        assert!(is_internal(&symbol));
        assert_eq!(module_of_function_index_offset(&symbol), Some("sum_ff00"));
        assert!(!is_internal("sum"));
    }
}
