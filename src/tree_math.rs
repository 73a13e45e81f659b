//! Addressing for array-based left-balanced binary trees.
//!
//! A tree with `n` leaves occupies `2n - 1` slots. Leaves sit at even indices,
//! internal nodes at odd ones, and the level of a node is the number of trailing
//! one bits in its index. Indices produced here are the wire indices used by
//! every protocol message, so the layout must not change.

/// Number of trailing one bits; 0 for leaves.
pub fn level(x: usize) -> usize {
    x.trailing_ones() as usize
}

/// Number of slots in a tree with `n` leaves.
pub fn node_width(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        2 * (n - 1) + 1
    }
}

/// Index of the root of a tree with `n` leaves.
pub fn root(n: usize) -> usize {
    let w = node_width(n);
    if w == 0 {
        return 0;
    }
    (1usize << w.ilog2()) - 1
}

pub fn left(x: usize) -> usize {
    let k = level(x);
    if k == 0 {
        return x;
    }
    x ^ (0x01 << (k - 1))
}

pub fn right(x: usize, n: usize) -> usize {
    debug_assert!(x < node_width(n), "node {} outside tree of {} leaves", x, n);

    let k = level(x);
    if k == 0 {
        return x;
    }

    let mut r = x ^ (0x03 << (k - 1));
    while r >= node_width(n) {
        r = left(r);
    }
    r
}

/// Parent in the infinite tree, ignoring the right edge of a truncated one.
fn parent_step(x: usize) -> usize {
    let k = level(x);
    (x | (1 << k)) & !(1 << (k + 1))
}

pub fn parent(x: usize, n: usize) -> usize {
    debug_assert!(x < node_width(n), "node {} outside tree of {} leaves", x, n);

    if x == root(n) {
        return x;
    }

    let mut p = parent_step(x);
    while p >= node_width(n) {
        p = parent_step(p);
    }
    p
}

pub fn sibling(x: usize, n: usize) -> usize {
    let p = parent(x, n);
    if x < p {
        right(p, n)
    } else if x > p {
        left(p)
    } else {
        p
    }
}

/// Ancestors of `x` starting at `x` itself and stopping just below the root.
pub fn dirpath(x: usize, n: usize) -> Vec<usize> {
    let r = root(n);
    if x == r {
        return Vec::new();
    }

    let mut d = vec![x];
    let mut p = parent(x, n);
    while p != r {
        d.push(p);
        p = parent(p, n);
    }
    d
}

/// Sibling of every node on the direct path of `x`.
pub fn copath(x: usize, n: usize) -> Vec<usize> {
    dirpath(x, n).into_iter().map(|d| sibling(d, n)).collect()
}

/// Heads of the complete subtrees covering a tree with `n` leaves, left to right.
pub fn frontier(n: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }

    let last = 2 * (n - 1);
    let mut f = copath(last, n);
    f.reverse();

    if f.last() != Some(&last) {
        f.push(last);
    }

    while f.len() > 1 {
        let r = f[f.len() - 1];
        let p = parent(r, n);
        if p != parent_step(r) {
            break;
        }

        // Replace the last two heads with their parent
        f.truncate(f.len() - 2);
        f.push(p);
    }

    f
}

/// Indices of every leaf slot.
pub fn leaves(n: usize) -> Vec<usize> {
    (0..n).map(|i| 2 * i).collect()
}
