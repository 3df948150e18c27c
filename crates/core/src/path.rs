//! Document path language
//!
//! A path is a dot-separated sequence of components addressing a position in
//! the document tree. Backslash escapes the next character. The final
//! character may be an unescaped operator: a trailing `.` turns the path
//! into a list insert, a trailing `+` turns the final component's set into
//! a numeric add.
//!
//! Parsing produces a flat list of [`Directive`]s; the modify algorithm
//! walks them, filling in missing parent containers as it goes. The
//! directive list is stack-local per operation; there is no shared path
//! builder state.

use smallvec::SmallVec;

use crate::error::{Result, StoreError};
use crate::value::{Value, MAX_SAFE_INTEGER};

/// One step of path navigation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    /// Descend or create into a map by key.
    MapKey(String),
    /// Descend or create into a list at an index.
    ListIndex(usize),
    /// Descend into the last element; index 0 of an empty or new list.
    ListLastIndex,
    /// Append a new element to the current list.
    ListInsert,
    /// Numeric-add at a map key.
    MapKeyAdd(String),
    /// Numeric-add at a list index.
    ListIndexAdd(usize),
    /// Numeric-add at the last element.
    ListLastIndexAdd,
}

/// Parsed directive list. Paths are short; eight slots cover every path the
/// crash reporter emits without spilling to the heap.
pub type Directives = SmallVec<[Directive; 8]>;

impl Directive {
    /// True if this directive keys into a map (rather than a list).
    fn wants_map(&self) -> bool {
        matches!(self, Directive::MapKey(_) | Directive::MapKeyAdd(_))
    }

    /// True for the numeric-add variants.
    pub fn is_add(&self) -> bool {
        matches!(
            self,
            Directive::MapKeyAdd(_) | Directive::ListIndexAdd(_) | Directive::ListLastIndexAdd
        )
    }
}

/// Parse a path string into directives.
///
/// An empty path yields an empty list: the whole-document address.
pub fn parse(path: &str) -> Result<Directives> {
    let mut components: Vec<(String, bool)> = Vec::new();
    let mut cur = String::new();
    let mut cur_escaped = false;
    let mut trailing_insert = false;
    let mut trailing_add = false;
    let mut chars = path.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => {
                    cur.push(next);
                    cur_escaped = true;
                }
                None => {
                    return Err(StoreError::invalid_path(path, "path ends in a bare escape"));
                }
            },
            '.' if chars.as_str().is_empty() => trailing_insert = true,
            '.' => {
                components.push((std::mem::take(&mut cur), cur_escaped));
                cur_escaped = false;
            }
            '+' if chars.as_str().is_empty() => trailing_add = true,
            _ => cur.push(c),
        }
    }

    if trailing_add && cur.is_empty() && !cur_escaped {
        return Err(StoreError::invalid_path(path, "component is a bare operator"));
    }
    if !cur.is_empty() || cur_escaped {
        components.push((cur, cur_escaped));
    }

    let mut directives = Directives::new();
    let last = components.len().checked_sub(1);
    for (i, (comp, escaped)) in components.iter().enumerate() {
        // The `+` operator only ever modifies the final component
        let add = trailing_add && Some(i) == last;
        directives.push(component_directive(comp, *escaped, add, path)?);
    }
    if trailing_insert {
        directives.push(Directive::ListInsert);
    }
    Ok(directives)
}

/// Convert one trimmed, unescaped component into a directive.
fn component_directive(raw: &str, escaped: bool, add: bool, path: &str) -> Result<Directive> {
    let comp = raw.trim();
    if comp == "+" && !escaped {
        return Err(StoreError::invalid_path(path, "component is a bare operator"));
    }
    if let Ok(i) = comp.parse::<i64>() {
        return match i {
            -1 => Ok(if add {
                Directive::ListLastIndexAdd
            } else {
                Directive::ListLastIndex
            }),
            i if i >= 0 => Ok(if add {
                Directive::ListIndexAdd(i as usize)
            } else {
                Directive::ListIndex(i as usize)
            }),
            i => Err(StoreError::invalid_path(
                path,
                format!("negative list index {i}"),
            )),
        };
    }
    Ok(if add {
        Directive::MapKeyAdd(comp.to_owned())
    } else {
        Directive::MapKey(comp.to_owned())
    })
}

/// Render directives back to a canonical path string. Inverse of [`parse`]
/// for keys that do not themselves look like integers.
pub fn render(directives: &[Directive]) -> String {
    fn escape_key(key: &str, out: &mut String) {
        for c in key.chars() {
            if matches!(c, '.' | '+' | '\\') {
                out.push('\\');
            }
            out.push(c);
        }
    }

    let mut out = String::new();
    for (i, d) in directives.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        match d {
            Directive::MapKey(k) | Directive::MapKeyAdd(k) => escape_key(k, &mut out),
            Directive::ListIndex(i) | Directive::ListIndexAdd(i) => {
                out.push_str(&i.to_string());
            }
            Directive::ListLastIndex | Directive::ListLastIndexAdd => out.push_str("-1"),
            Directive::ListInsert => {}
        }
    }
    if directives.last().map(Directive::is_add).unwrap_or(false) {
        out.push('+');
    }
    out
}

/// Apply a mutation at the position the directives address.
///
/// Missing parents are created along the way: a map when the next directive
/// keys by name, a list otherwise. A `Null` value deletes (delete of a
/// missing entry is a no-op). An empty directive list replaces the whole
/// document and requires a map value.
pub fn apply(root: &Value, path: &str, directives: &[Directive], value: &Value) -> Result<()> {
    if directives.is_empty() {
        let replacement = value.as_map().ok_or_else(|| {
            StoreError::invalid_path(
                path,
                format!("whole-document replace requires a map, got {}", value.kind()),
            )
        })?;
        let map = root
            .as_map()
            .ok_or_else(|| mismatch(path, "map", root))?;
        map.clear();
        for entry in replacement.iter() {
            map.insert(entry.key().clone(), entry.value().deep_clone());
        }
        return Ok(());
    }

    let mut parent = root.clone();
    for i in 0..directives.len() - 1 {
        parent = descend(&parent, &directives[i], &directives[i + 1], path)?;
    }
    apply_leaf(&parent, directives.last().expect("non-empty"), value, path)
}

/// Resolve directives to a value without creating anything. Add variants
/// resolve like their plain forms; a list-insert position has no value.
pub fn resolve(root: &Value, directives: &[Directive]) -> Option<Value> {
    let mut cur = root.clone();
    for d in directives {
        cur = match d {
            Directive::MapKey(k) | Directive::MapKeyAdd(k) => cur.map_get(k)?,
            Directive::ListIndex(i) | Directive::ListIndexAdd(i) => cur.list_get(*i)?,
            Directive::ListLastIndex | Directive::ListLastIndexAdd => {
                cur.as_list()?.read().last().cloned()?
            }
            Directive::ListInsert => return None,
        };
    }
    Some(cur)
}

fn mismatch(path: &str, expected: &'static str, found: &Value) -> StoreError {
    StoreError::invalid_path(path, format!("expected {expected}, found {}", found.kind()))
}

fn new_container(wants_map: bool) -> Value {
    if wants_map {
        Value::new_map()
    } else {
        Value::new_list()
    }
}

fn kind_matches(v: &Value, wants_map: bool) -> bool {
    if wants_map {
        v.is_map()
    } else {
        v.is_list()
    }
}

/// Step from `parent` through `d`, creating (or re-typing) the child
/// container that `next` requires.
fn descend(parent: &Value, d: &Directive, next: &Directive, path: &str) -> Result<Value> {
    let needs_map = next.wants_map();
    match d {
        Directive::MapKey(key) => {
            let map = parent.as_map().ok_or_else(|| mismatch(path, "map", parent))?;
            let mut entry = map
                .entry(key.clone())
                .or_insert_with(|| new_container(needs_map));
            if !kind_matches(entry.value(), needs_map) {
                *entry.value_mut() = new_container(needs_map);
            }
            Ok(entry.value().clone())
        }
        Directive::ListIndex(i) => descend_list(parent, Some(*i), needs_map, path),
        Directive::ListLastIndex => descend_list(parent, None, needs_map, path),
        _ => Err(StoreError::invalid_path(
            path,
            "operator directive before end of path",
        )),
    }
}

/// Step into a list at `index` (`None` = last element), creating the child
/// container when stepping one past the end. A fresh list therefore admits
/// only index 0, last-index, or insert.
fn descend_list(
    parent: &Value,
    index: Option<usize>,
    needs_map: bool,
    path: &str,
) -> Result<Value> {
    let list = parent.as_list().ok_or_else(|| mismatch(path, "list", parent))?;
    let mut vec = list.write();
    let len = vec.len();
    let index = match index {
        Some(i) => i,
        None => len.saturating_sub(1),
    };
    if index == len {
        let child = new_container(needs_map);
        vec.push(child.clone());
        return Ok(child);
    }
    if index > len {
        return Err(StoreError::invalid_path(
            path,
            format!("list index {index} out of bounds (len {len})"),
        ));
    }
    if !kind_matches(&vec[index], needs_map) {
        vec[index] = new_container(needs_map);
    }
    Ok(vec[index].clone())
}

/// Apply the final directive's set, add, or insert operation.
fn apply_leaf(parent: &Value, d: &Directive, value: &Value, path: &str) -> Result<()> {
    match d {
        Directive::MapKey(key) => {
            let map = parent.as_map().ok_or_else(|| mismatch(path, "map", parent))?;
            if value.is_null() {
                map.remove(key);
            } else {
                map.insert(key.clone(), value.deep_clone());
            }
            Ok(())
        }
        Directive::MapKeyAdd(key) => {
            let map = parent.as_map().ok_or_else(|| mismatch(path, "map", parent))?;
            if !value.is_numeric() {
                return Err(StoreError::invalid_path(
                    path,
                    format!("numeric add requires a number, got {}", value.kind()),
                ));
            }
            let mut entry = map.entry(key.clone()).or_insert(Value::Null);
            let sum = numeric_add(entry.value(), value, path)?;
            *entry.value_mut() = sum;
            Ok(())
        }
        Directive::ListIndex(i) => list_set(parent, Some(*i), value, path),
        Directive::ListLastIndex => list_set(parent, None, value, path),
        Directive::ListIndexAdd(i) => list_add(parent, Some(*i), value, path),
        Directive::ListLastIndexAdd => list_add(parent, None, value, path),
        Directive::ListInsert => {
            let list = parent.as_list().ok_or_else(|| mismatch(path, "list", parent))?;
            if !value.is_null() {
                list.write().push(value.deep_clone());
            }
            Ok(())
        }
    }
}

/// Set or delete a list element. `None` addresses the last element. Setting
/// one past the end appends; further out is an error. Deletes out of range
/// are no-ops.
fn list_set(parent: &Value, index: Option<usize>, value: &Value, path: &str) -> Result<()> {
    let list = parent.as_list().ok_or_else(|| mismatch(path, "list", parent))?;
    let mut vec = list.write();
    let len = vec.len();
    let index = match index {
        Some(i) => i,
        None => len.saturating_sub(1),
    };
    if value.is_null() {
        if index < len {
            vec.remove(index);
        }
        return Ok(());
    }
    if index < len {
        vec[index] = value.deep_clone();
    } else if index == len {
        vec.push(value.deep_clone());
    } else {
        return Err(StoreError::invalid_path(
            path,
            format!("list index {index} out of bounds (len {len})"),
        ));
    }
    Ok(())
}

/// Numeric-add into a list element; a slot one past the end receives the
/// addend itself.
fn list_add(parent: &Value, index: Option<usize>, value: &Value, path: &str) -> Result<()> {
    let list = parent.as_list().ok_or_else(|| mismatch(path, "list", parent))?;
    let mut vec = list.write();
    let len = vec.len();
    let index = match index {
        Some(i) => i,
        None => len.saturating_sub(1),
    };
    if index < len {
        vec[index] = numeric_add(&vec[index], value, path)?;
    } else if index == len {
        vec.push(numeric_add(&Value::Null, value, path)?);
    } else {
        return Err(StoreError::invalid_path(
            path,
            format!("list index {index} out of bounds (len {len})"),
        ));
    }
    Ok(())
}

/// int + int stays int while the sum is in the safe range; any float
/// operand (or an unsafe sum) promotes to float. A `Null` current value
/// means the slot was empty: the addend is inserted as-is.
fn numeric_add(current: &Value, addend: &Value, path: &str) -> Result<Value> {
    if !addend.is_numeric() {
        return Err(StoreError::invalid_path(
            path,
            format!("numeric add requires a number, got {}", addend.kind()),
        ));
    }
    match current {
        Value::Null => Ok(addend.clone()),
        Value::Int(a) => match addend {
            Value::Int(b) => Ok(a
                .checked_add(*b)
                .filter(|sum| *sum <= MAX_SAFE_INTEGER && *sum >= -MAX_SAFE_INTEGER)
                .map(Value::Int)
                .unwrap_or(Value::Float(*a as f64 + *b as f64))),
            _ => Ok(Value::Float(*a as f64 + addend.as_f64().expect("numeric"))),
        },
        Value::Float(a) => Ok(Value::Float(a + addend.as_f64().expect("numeric"))),
        other => Err(StoreError::invalid_path(
            path,
            format!("numeric add target is {}", other.kind()),
        )),
    }
}
