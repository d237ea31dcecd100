//! Constants every script can use without including anything.

/// `(name, replacement)` pairs registered as builtin object macros.
pub const COMPILER_PROVIDED_CONSTANTS: &[(&str, &str)] = &[
    ("INT_MIN", "-2147483648"),
    ("INT_MAX", "2147483647"),
    ("UINT_MIN", "0u"),
    ("UINT_MAX", "4294967295u"),
    ("LONG_MIN", "-9223372036854775808L"),
    ("LONG_MAX", "9223372036854775807L"),
    ("ULONG_MIN", "0UL"),
    ("ULONG_MAX", "18446744073709551615UL"),

    ("CELL_PAD_CTRL_L3_LEFT", "65361"),
    ("CELL_PAD_CTRL_L3_UP", "65362"),
    ("CELL_PAD_CTRL_L3_RIGHT", "65363"),
    ("CELL_PAD_CTRL_L3_DOWN", "65364"),

    ("CELL_PAD_CTRL_R3_LEFT", "65460"),
    ("CELL_PAD_CTRL_R3_UP", "65464"),
    ("CELL_PAD_CTRL_R3_RIGHT", "65462"),
    ("CELL_PAD_CTRL_R3_DOWN", "65458"),

    ("CELL_PAD_CTRL_CROSS", "65293"),
    ("CELL_PAD_CTRL_SQUARE", "65471"),
    ("CELL_PAD_CTRL_TRIANGLE", "65470"),
    ("CELL_PAD_CTRL_CIRCLE", "65307"),

    ("CELL_PAD_CTRL_SELECT", "65379"),
    ("CELL_PAD_CTRL_START", "65421"),

    ("CELL_PAD_CTRL_L1", "65495"),
    ("CELL_PAD_CTRL_L2", "65496"),
    ("CELL_PAD_CTRL_L3", "65497"),
    ("CELL_PAD_CTRL_R1", "65500"),
    ("CELL_PAD_CTRL_R2", "65501"),
    ("CELL_PAD_CTRL_R3", "65502"),

    ("COLOR_DEFAULT", "16"),
    ("COLOR_WHITE", "17"),
    ("COLOR_RED", "18"),
    ("COLOR_GREEN", "19"),
    ("COLOR_BLUE", "20"),
    ("COLOR_YELLOW", "21"),
    ("COLOR_CYAN", "22"),
    ("COLOR_BLACK", "23"),

    ("STATE_EXIT", "0"),
    ("STATE_RETURN", "1"),
    ("STATE_YIELD", "2"),
    ("STATE_EXCEPTION", "3"),
    ("STATE_CALL", "4"),
    ("STATE_RUN", "5"),

    // scroll clip modes
    ("SCROLL_MODE_FOLLOW_FOCUS", "0"),
    ("SCROLL_MODE_FLOATING", "1"),
    ("SCROLL_MODE_MANUAL", "2"),
    ("SCROLL_MODE_FOLLOW_MODE", "3"),

    // sqlite3 result codes
    ("SQLITE_OK", "0"),
    ("SQLITE_ERROR", "1"),
    ("SQLITE_INTERNAL", "2"),
    ("SQLITE_PERM", "3"),
    ("SQLITE_ABORT", "4"),
    ("SQLITE_BUSY", "5"),
    ("SQLITE_LOCKED", "6"),
    ("SQLITE_NOMEM", "7"),
    ("SQLITE_READONLY", "8"),
    ("SQLITE_INTERRUPT", "9"),
    ("SQLITE_IOERR", "10"),
    ("SQLITE_CORRUPT", "11"),
    ("SQLITE_NOTFOUND", "12"),
    ("SQLITE_FULL", "13"),
    ("SQLITE_CANTOPEN", "14"),
    ("SQLITE_PROTOCOL", "15"),
    ("SQLITE_EMPTY", "16"),
    ("SQLITE_SCHEMA", "17"),
    ("SQLITE_TOOBIG", "18"),
    ("SQLITE_CONSTRAINT", "19"),
    ("SQLITE_MISMATCH", "20"),
    ("SQLITE_MISUSE", "21"),
    ("SQLITE_NOLFS", "22"),
    ("SQLITE_AUTH", "23"),
    ("SQLITE_FORMAT", "24"),
    ("SQLITE_RANGE", "25"),
    ("SQLITE_NOTADB", "26"),
    ("SQLITE_NOTICE", "27"),
    ("SQLITE_WARNING", "28"),
    ("SQLITE_ROW", "100"),
    ("SQLITE_DONE", "101"),
];
