// Randomized structural testing: build node pages from random ascending
// key sequences, split them at every valid offset, and check the
// universal invariants hold afterward (spec §8).

use std::sync::Arc;

use rand::Rng;

use cowtree::btree::key_type::I64KeyType;
use cowtree::btree::local_page::LocalPage;
use cowtree::btree::node_page::NodePage;
use cowtree::btree::page_pos::PagePos;
use cowtree::btree::page_reference::{ChildKind, PageReference};
use cowtree::config::PageConfig;

fn leaf(pos: u64) -> Arc<PageReference> {
    PageReference::evicted(PagePos(pos), ChildKind::Leaf)
}

fn random_ascending_keys(rng: &mut impl Rng, count: usize) -> Vec<i64> {
    let mut keys = Vec::with_capacity(count);
    let mut next = rng.gen_range(0, 1000);
    for _ in 0..count {
        keys.push(next);
        next += rng.gen_range(1, 50);
    }
    keys
}

#[test]
fn random_splits_preserve_universal_invariants() {
    let mut rng = rand::thread_rng();
    let cfg = PageConfig::default();
    let codec = I64KeyType;

    for _ in 0..50 {
        let key_count = rng.gen_range(2, 64);
        let keys = random_ascending_keys(&mut rng, key_count);
        let children: Vec<Arc<PageReference>> = (0..=key_count as u64).map(leaf).collect();

        let mut node = NodePage::with_computed_memory(keys.clone(), children, &codec, &cfg);
        node.check_invariants().unwrap();
        assert_eq!(node.memory(), NodePage::compute_memory(&keys, key_count + 1, &codec, &cfg));

        let at = rng.gen_range(0, key_count);
        let separator = keys[at];
        let (returned_separator, right) = node.split(at, &codec, &cfg).unwrap();
        assert_eq!(returned_separator, separator);

        node.check_invariants().unwrap();
        right.check_invariants().unwrap();

        assert_eq!(node.keys().len() + right.keys().len() + 1, key_count);
        assert_eq!(node.children().len() + right.children().len(), key_count + 1);

        // The separator must not reappear in either child's keys.
        assert!(!node.keys().contains(&separator));
        assert!(!right.keys().contains(&separator));

        // Every key kept in the left child is strictly less than every
        // key handed to the right child and the separator itself.
        if let (Some(&last_left), Some(&first_right)) = (node.keys().last(), right.keys().first()) {
            assert!(last_left < separator);
            assert!(separator < first_right);
        }
    }
}
