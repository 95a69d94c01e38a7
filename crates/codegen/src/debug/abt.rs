//! A persistent AVL tree.
//!
//! Updates copy the path from the root to the changed node and share every
//! other node, so keeping one map per block costs little when neighbouring
//! blocks differ in a few variables.
use std::{cmp::Ordering, fmt, sync::Arc};

type Link<K, V> = Option<Arc<Node<K, V>>>;

struct Node<K, V> {
    key: K,
    value: V,
    height: u8,
    left: Link<K, V>,
    right: Link<K, V>,
}

pub struct PersistentMap<K, V> {
    root: Link<K, V>,
    len: usize,
}

impl<K, V> Clone for PersistentMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            len: self.len,
        }
    }
}

impl<K, V> Default for PersistentMap<K, V> {
    fn default() -> Self {
        Self { root: None, len: 0 }
    }
}

impl<K: Ord + Clone, V: Clone> PersistentMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let mut link = &self.root;
        while let Some(node) = link {
            match key.cmp(&node.key) {
                Ordering::Less => link = &node.left,
                Ordering::Greater => link = &node.right,
                Ordering::Equal => return Some(&node.value),
            }
        }
        None
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Maps `key` to `value`, replacing any previous value.
    pub fn insert(&mut self, key: K, value: V) {
        let mut replaced = false;
        self.root = Some(insert(&self.root, key, value, &mut replaced));
        if !replaced {
            self.len += 1;
        }
    }

    pub fn remove(&mut self, key: &K) -> bool {
        let mut removed = false;
        let root = remove(&self.root, key, &mut removed);
        if removed {
            self.root = root;
            self.len -= 1;
        }
        removed
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter { stack: Vec::new() };
        iter.push_left(&self.root);
        iter
    }

    /// Returns `true` if both maps share the same tree, which implies equal
    /// contents.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

fn height<K, V>(link: &Link<K, V>) -> u8 {
    link.as_ref().map_or(0, |n| n.height)
}

fn node<K, V>(key: K, value: V, left: Link<K, V>, right: Link<K, V>) -> Arc<Node<K, V>> {
    let height = 1 + height(&left).max(height(&right));
    Arc::new(Node {
        key,
        value,
        height,
        left,
        right,
    })
}

/// Builds a node from subtrees whose heights differ by at most two,
/// rotating to restore the AVL balance.
fn balance<K: Clone, V: Clone>(
    key: K,
    value: V,
    left: Link<K, V>,
    right: Link<K, V>,
) -> Arc<Node<K, V>> {
    let (hl, hr) = (height(&left), height(&right));
    if hl > hr + 1 {
        if let Some(l) = &left {
            if let Some(lr) = l.right.as_ref().filter(|_| height(&l.left) < height(&l.right)) {
                let new_left = node(l.key.clone(), l.value.clone(), l.left.clone(), lr.left.clone());
                let new_right = node(key, value, lr.right.clone(), right);
                return node(lr.key.clone(), lr.value.clone(), Some(new_left), Some(new_right));
            }
            let new_right = node(key, value, l.right.clone(), right);
            return node(l.key.clone(), l.value.clone(), l.left.clone(), Some(new_right));
        }
    } else if hr > hl + 1 {
        if let Some(r) = &right {
            if let Some(rl) = r.left.as_ref().filter(|_| height(&r.right) < height(&r.left)) {
                let new_left = node(key, value, left, rl.left.clone());
                let new_right =
                    node(r.key.clone(), r.value.clone(), rl.right.clone(), r.right.clone());
                return node(rl.key.clone(), rl.value.clone(), Some(new_left), Some(new_right));
            }
            let new_left = node(key, value, left, r.left.clone());
            return node(r.key.clone(), r.value.clone(), Some(new_left), r.right.clone());
        }
    }
    node(key, value, left, right)
}

fn insert<K: Ord + Clone, V: Clone>(
    link: &Link<K, V>,
    key: K,
    value: V,
    replaced: &mut bool,
) -> Arc<Node<K, V>> {
    let Some(n) = link else {
        return node(key, value, None, None);
    };
    match key.cmp(&n.key) {
        Ordering::Less => {
            let left = insert(&n.left, key, value, replaced);
            balance(n.key.clone(), n.value.clone(), Some(left), n.right.clone())
        }
        Ordering::Greater => {
            let right = insert(&n.right, key, value, replaced);
            balance(n.key.clone(), n.value.clone(), n.left.clone(), Some(right))
        }
        Ordering::Equal => {
            *replaced = true;
            node(key, value, n.left.clone(), n.right.clone())
        }
    }
}

fn remove<K: Ord + Clone, V: Clone>(link: &Link<K, V>, key: &K, removed: &mut bool) -> Link<K, V> {
    let n = link.as_ref()?;
    match key.cmp(&n.key) {
        Ordering::Less => {
            let left = remove(&n.left, key, removed);
            Some(balance(n.key.clone(), n.value.clone(), left, n.right.clone()))
        }
        Ordering::Greater => {
            let right = remove(&n.right, key, removed);
            Some(balance(n.key.clone(), n.value.clone(), n.left.clone(), right))
        }
        Ordering::Equal => {
            *removed = true;
            match (&n.left, &n.right) {
                (None, right) => right.clone(),
                (left, None) => left.clone(),
                (left, Some(right)) => {
                    let (k, v, rest) = remove_min(right);
                    Some(balance(k, v, left.clone(), rest))
                }
            }
        }
    }
}

fn remove_min<K: Clone, V: Clone>(n: &Arc<Node<K, V>>) -> (K, V, Link<K, V>) {
    match &n.left {
        None => (n.key.clone(), n.value.clone(), n.right.clone()),
        Some(l) => {
            let (k, v, rest) = remove_min(l);
            let node = balance(n.key.clone(), n.value.clone(), rest, n.right.clone());
            (k, v, Some(node))
        }
    }
}

pub struct Iter<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
}

impl<'a, K, V> Iter<'a, K, V> {
    fn push_left(&mut self, mut link: &'a Link<K, V>) {
        while let Some(n) = link {
            self.stack.push(n);
            link = &n.left;
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.stack.pop()?;
        self.push_left(&n.right);
        Some((&n.key, &n.value))
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> PartialEq for PersistentMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || (self.len == other.len && self.iter().eq(other.iter()))
    }
}

impl<K: Ord + Clone + fmt::Debug, V: Clone + fmt::Debug> fmt::Debug for PersistentMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_balanced<K: Ord, V>(link: &Link<K, V>) -> u8 {
        let Some(n) = link else {
            return 0;
        };
        let (hl, hr) = (check_balanced(&n.left), check_balanced(&n.right));
        assert!(hl.abs_diff(hr) <= 1);
        assert_eq!(n.height, 1 + hl.max(hr));
        n.height
    }

    #[test]
    fn insert_remove_stays_balanced() {
        let mut map = PersistentMap::new();
        for i in 0..200u32 {
            map.insert(i * 7 % 200, i);
        }
        assert_eq!(map.len(), 200);
        check_balanced(&map.root);
        for i in (0..200u32).step_by(3) {
            assert!(map.remove(&i));
        }
        assert!(!map.remove(&0));
        check_balanced(&map.root);
        let keys: Vec<u32> = map.iter().map(|(k, _)| *k).collect();
        let expected: Vec<u32> = (0..200).filter(|i| i % 3 != 0).collect();
        assert_eq!(keys, expected);
        assert_eq!(map.len(), expected.len());
    }

    #[test]
    fn versions_are_independent() {
        let mut a = PersistentMap::new();
        a.insert("x", 1);
        a.insert("y", 2);
        let mut b = a.clone();
        assert!(a.ptr_eq(&b));

        b.insert("x", 10);
        b.remove(&"y");
        assert_eq!(a.get(&"x"), Some(&1));
        assert_eq!(a.get(&"y"), Some(&2));
        assert_eq!(b.get(&"x"), Some(&10));
        assert!(!b.contains_key(&"y"));
        assert!(!a.ptr_eq(&b));

        b.insert("x", 1);
        b.insert("y", 2);
        assert_eq!(a, b);
    }
}
