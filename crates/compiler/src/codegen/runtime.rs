//! C preamble for emitted modules
//!
//! The fixed include block plus a small library of runtime helpers. Only
//! the helpers a translation unit actually uses are emitted, in a fixed
//! order, so the output stays warning-clean under `-Wall` and identical
//! compilations stay byte-identical.

use std::fmt::Write as _;

/// Headers every emitted unit needs: the public API plus the internal
/// headers whose value-representation macros, table layout and collector
/// barriers the generated code observes.
const INCLUDES: &str = r#"
#include <math.h>
#include <string.h>
#include <stdio.h>
#include <stdlib.h>

/* The generated code observes the host's internal value representation,
 * so it compiles as a core unit. */
#define LUA_CORE

#include "lua.h"
#include "lauxlib.h"
#include "lualib.h"

#include "lapi.h"
#include "lgc.h"
#include "lobject.h"
#include "lstate.h"
#include "lstring.h"
#include "ltable.h"
#include "lvm.h"

#define TITAN_NUMBUFF 50
"#;

/// Helper emission order; dependencies come before dependents.
const HELPER_ORDER: &[&str] = &[
    "float2int",
    "int2str",
    "flt2str",
    "concat",
    "str_eq",
    "str_cmp",
    "arr_get",
    "arr_set",
    "map_get",
    "map_set",
    "rec_set",
    "rec_get",
    "open_module",
    "sym",
];

pub(super) fn helper_deps(helper: &str) -> &'static [&'static str] {
    match helper {
        "rec_set" => &["map_set"],
        "rec_get" => &["map_get"],
        _ => &[],
    }
}

fn helper_source(helper: &str) -> &'static str {
    match helper {
        "float2int" => {
            r#"
/* Float-to-integer coercion: floor, then trap when the result differs
 * from the input. */
static lua_Integer titan_float2int (lua_State *L, lua_Number n, int line) {
    lua_Integer i;
    lua_Number f = l_mathop(floor)(n);
    if (n != f || !lua_numbertointeger(f, &i))
        luaL_error(L, "number '%f' has no integer representation at line %d", n, line);
    return i;
}
"#
        }
        "int2str" => {
            r#"
static TString *titan_int2str (lua_State *L, lua_Integer i) {
    char buff[TITAN_NUMBUFF];
    int len = lua_integer2str(buff, sizeof(buff), i);
    return luaS_newlstr(L, buff, (size_t)len);
}
"#
        }
        "flt2str" => {
            r#"
static TString *titan_flt2str (lua_State *L, lua_Number n) {
    char buff[TITAN_NUMBUFF];
    int len = lua_number2str(buff, sizeof(buff), n);
    return luaS_newlstr(L, buff, (size_t)len);
}
"#
        }
        "concat" => {
            r#"
/* Multi-operand concatenation: sum the operand lengths; a short result
 * packs into a stack buffer and interns, a long one allocates once and
 * copies the parts in order. */
static TString *titan_concat (lua_State *L, int n, TString **parts) {
    size_t len = 0;
    int i;
    for (i = 0; i < n; i++) len += tsslen(parts[i]);
    if (len <= LUAI_MAXSHORTLEN) {
        char buff[LUAI_MAXSHORTLEN];
        char *p = buff;
        for (i = 0; i < n; i++) {
            memcpy(p, getstr(parts[i]), tsslen(parts[i]));
            p += tsslen(parts[i]);
        }
        return luaS_newlstr(L, buff, len);
    } else {
        TString *ts = luaS_createlngstrobj(L, len);
        char *p = getstr(ts);
        for (i = 0; i < n; i++) {
            memcpy(p, getstr(parts[i]), tsslen(parts[i]));
            p += tsslen(parts[i]);
        }
        return ts;
    }
}
"#
        }
        "str_eq" => {
            r#"
static int titan_str_eq (TString *a, TString *b) {
    return (a == b) ||
        (a->tt == LUA_TLNGSTR && b->tt == LUA_TLNGSTR && luaS_eqlngstr(a, b));
}
"#
        }
        "str_cmp" => {
            r#"
/* Lexicographic byte order; the host's locale-aware collation is not
 * observable from Titan programs. */
static int titan_str_cmp (TString *a, TString *b) {
    size_t la = tsslen(a);
    size_t lb = tsslen(b);
    size_t lmin = la < lb ? la : lb;
    int r = memcmp(getstr(a), getstr(b), lmin);
    if (r != 0) return r;
    return la < lb ? -1 : (la > lb ? 1 : 0);
}
"#
        }
        "arr_get" => {
            r#"
/* Array read: array-part fast path, hash fallback; a nil slot is an
 * out-of-range or deleted index and traps. */
static const TValue *titan_arr_get (lua_State *L, Table *t, lua_Integer i, int line) {
    const TValue *slot;
    lua_Unsigned ui = l_castS2U(i) - 1;
    if (ui < t->sizearray)
        slot = &t->array[ui];
    else
        slot = luaH_getint(t, i);
    if (ttisnil(slot))
        luaL_error(L, "array index %I out of range at line %d", (LUAI_UACINT)i, line);
    return slot;
}
"#
        }
        "arr_set" => {
            r#"
/* Array write: in place while the index is inside the array part; the
 * table grows by doubling while the index stays below 2*sizearray; the
 * hash part takes anything beyond. The store is followed by the backward
 * write barrier. */
static void titan_arr_set (lua_State *L, Table *t, lua_Integer i, TValue *v) {
    lua_Unsigned ui = l_castS2U(i) - 1;
    if (ui < t->sizearray) {
        setobj2t(L, &t->array[ui], v);
    } else if (ui < 2 * cast(lua_Unsigned, t->sizearray) || ui == 0) {
        unsigned int size = t->sizearray > 0 ? 2 * t->sizearray : 1;
        luaH_resizearray(L, t, size);
        setobj2t(L, &t->array[ui], v);
    } else {
        luaH_setint(L, t, i, v);
    }
    luaC_barrierback(L, t, v);
}
"#
        }
        "map_get" => {
            r#"
static const TValue *titan_map_get (lua_State *L, Table *t, TValue *k, int line) {
    const TValue *slot = luaH_get(t, k);
    if (ttisnil(slot))
        luaL_error(L, "map key not found at line %d", line);
    return slot;
}
"#
        }
        "map_set" => {
            r#"
static void titan_map_set (lua_State *L, Table *t, TValue *k, TValue *v) {
    TValue *cell = luaH_set(L, t, k);
    setobj2t(L, cell, v);
    luaC_barrierback(L, t, v);
}
"#
        }
        "rec_set" => {
            r#"
static void titan_rec_set (lua_State *L, Table *t, TString *k, TValue *v) {
    TValue key;
    setsvalue(L, &key, k);
    titan_map_set(L, t, &key, v);
}
"#
        }
        "rec_get" => {
            r#"
static const TValue *titan_rec_get (lua_State *L, Table *t, TString *k) {
    const TValue *slot = luaH_getstr(t, k);
    (void)L;
    return slot;
}
"#
        }
        "open_module" => {
            r#"
#include <dlfcn.h>

#define TITAN_PATH_VAR "TITAN_PATH_0_5"
#define TITAN_PATH_VAR_COMPAT "TITAN_PATH"
#define TITAN_PATH_DEFAULT ".;/usr/local/lib/titan/0.5"

static void *titan_try_dir (const char *dir, size_t dirlen, const char *file) {
    char full[4096];
    if (dirlen == 0 || dirlen + strlen(file) + 5 >= sizeof(full)) return NULL;
    memcpy(full, dir, dirlen);
    snprintf(full + dirlen, sizeof(full) - dirlen, "/%s.so", file);
    return dlopen(full, RTLD_NOW | RTLD_GLOBAL);
}

/* Find and open the shared object of a module, scanning the semicolon
 * separated directory list. An empty ';;' segment stands for the default
 * path. */
static void *titan_open_module (lua_State *L, const char *name) {
    const char *path = getenv(TITAN_PATH_VAR);
    char expanded[4096];
    char file[1024];
    size_t i;
    size_t start = 0;
    void *handle = NULL;
    const char *sep;
    if (path == NULL) path = getenv(TITAN_PATH_VAR_COMPAT);
    if (path == NULL) path = TITAN_PATH_DEFAULT;
    sep = strstr(path, ";;");
    if (sep != NULL) {
        snprintf(expanded, sizeof(expanded), "%.*s;%s;%s",
                 (int)(sep - path), path, TITAN_PATH_DEFAULT, sep + 2);
        path = expanded;
    }
    for (i = 0; name[i] != '\0' && i + 1 < sizeof(file); i++)
        file[i] = name[i] == '.' ? '/' : name[i];
    file[i] = '\0';
    for (i = 0; ; i++) {
        if (path[i] == ';' || path[i] == '\0') {
            handle = titan_try_dir(path + start, i - start, file);
            if (handle != NULL) return handle;
            start = i + 1;
            if (path[i] == '\0') break;
        }
    }
    luaL_error(L, "module '%s' not found on " TITAN_PATH_VAR, name);
    return NULL;
}
"#
        }
        "sym" => {
            r#"
static void *titan_sym (lua_State *L, void *handle, const char *sym) {
    void *p = dlsym(handle, sym);
    if (p == NULL)
        luaL_error(L, "missing symbol '%s' in compiled module", sym);
    return p;
}
"#
        }
        other => unreachable!("unknown runtime helper '{}'", other),
    }
}

/// Write the include block and the used subset of the helper library.
pub(super) fn emit_preamble(
    out: &mut String,
    used: &std::collections::BTreeSet<&'static str>,
) -> std::fmt::Result {
    out.push_str(INCLUDES);
    for helper in HELPER_ORDER {
        if used.contains(helper) {
            out.push_str(helper_source(helper));
        }
    }
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_only_used_helpers_are_emitted() {
        let mut used = BTreeSet::new();
        used.insert("concat");
        let mut out = String::new();
        emit_preamble(&mut out, &used).unwrap();
        assert!(out.contains("titan_concat"));
        assert!(!out.contains("titan_float2int"));
        assert!(!out.contains("dlfcn"));
    }

    #[test]
    fn test_every_ordered_helper_has_source() {
        for helper in HELPER_ORDER {
            assert!(!helper_source(helper).is_empty());
        }
    }

    #[test]
    fn test_deps_are_ordered_before_dependents() {
        for (i, helper) in HELPER_ORDER.iter().enumerate() {
            for dep in helper_deps(helper) {
                let dep_pos = HELPER_ORDER.iter().position(|h| h == dep).unwrap();
                assert!(dep_pos < i, "{} must precede {}", dep, helper);
            }
        }
    }
}
