//! Fork reconciliation: when the chain head moves from one branch to another,
//! compute the transactions of the abandoned branch that the adopted branch
//! does not carry, so the mempool can take them back.

use log::debug;
use std::collections::HashSet;
use weft_hashes::Hash;

use crate::errors::{ChainDbError, ChainDbResult};
use crate::header::BlockHeader;
use crate::headerdb::HeaderDb;

/// Upper bound on the number of headers walked down either branch while
/// searching for the fork point.
pub const DEFAULT_REORG_DEPTH_LIMIT: u64 = 1_000_000;

/// Transactions to reintroduce to the mempool when the head moves from
/// `old_head` to `new_head`. `payload_txs` resolves a header to the set of
/// transactions its block carries and is typically backed by the payload DB.
pub fn reorg_transactions<F>(
    db: &HeaderDb,
    new_head: &BlockHeader,
    old_head: &BlockHeader,
    payload_txs: F,
) -> ChainDbResult<HashSet<Hash>>
where
    F: FnMut(&BlockHeader) -> HashSet<Hash>,
{
    reorg_transactions_bounded(db, new_head, old_head, payload_txs, DEFAULT_REORG_DEPTH_LIMIT)
}

/// As [`reorg_transactions`], with a caller-chosen bound on the per-branch
/// walk depth.
pub fn reorg_transactions_bounded<F>(
    db: &HeaderDb,
    new_head: &BlockHeader,
    old_head: &BlockHeader,
    mut payload_txs: F,
    depth_limit: u64,
) -> ChainDbResult<HashSet<Hash>>
where
    F: FnMut(&BlockHeader) -> HashSet<Hash>,
{
    if !db.contains(new_head.height, new_head.hash)? {
        return Err(ChainDbError::MissingHead(new_head.hash));
    }
    if !db.contains(old_head.height, old_head.hash)? {
        return Err(ChainDbError::MissingHead(old_head.hash));
    }
    if new_head.hash == old_head.hash {
        return Ok(HashSet::new());
    }

    // Interleaved walk: bring both cursors to the same height, then step them
    // in lockstep until they meet at the fork point. Work is bounded by the
    // two branch lengths rather than the chain length.
    let mut new_cursor = new_head.clone();
    let mut old_cursor = old_head.clone();
    let mut new_branch = Vec::new();
    let mut old_branch = Vec::new();

    while new_cursor.height > old_cursor.height {
        let parent = stored_parent(db, &new_cursor)?;
        new_branch.push(std::mem::replace(&mut new_cursor, parent));
        check_depth(&new_branch, depth_limit)?;
    }
    while old_cursor.height > new_cursor.height {
        let parent = stored_parent(db, &old_cursor)?;
        old_branch.push(std::mem::replace(&mut old_cursor, parent));
        check_depth(&old_branch, depth_limit)?;
    }
    while new_cursor.hash != old_cursor.hash {
        if new_cursor.height == 0 {
            // Both cursors sit at height 0 yet differ; a store seeded with a
            // single genesis cannot produce this.
            return Err(ChainDbError::Corruption {
                op: "reorg_transactions",
                id: new_cursor.hash,
                reason: "branches do not share a genesis".to_string(),
            });
        }
        let parent = stored_parent(db, &new_cursor)?;
        new_branch.push(std::mem::replace(&mut new_cursor, parent));
        let parent = stored_parent(db, &old_cursor)?;
        old_branch.push(std::mem::replace(&mut old_cursor, parent));
        // The old branch may already carry entries from the height-alignment
        // phase, so both branches are bounded independently.
        check_depth(&new_branch, depth_limit)?;
        check_depth(&old_branch, depth_limit)?;
    }

    debug!(
        "reorg from {} to {}: fork point {} at height {}, {} headers abandoned, {} adopted",
        old_head.hash,
        new_head.hash,
        new_cursor.hash,
        new_cursor.height,
        old_branch.len(),
        new_branch.len()
    );

    let mut adopted_txs = HashSet::new();
    for header in &new_branch {
        adopted_txs.extend(payload_txs(header));
    }
    let mut reintroduce = HashSet::new();
    for header in &old_branch {
        reintroduce.extend(payload_txs(header).into_iter().filter(|tx| !adopted_txs.contains(tx)));
    }
    Ok(reintroduce)
}

fn check_depth(branch: &[BlockHeader], depth_limit: u64) -> ChainDbResult<()> {
    if branch.len() as u64 > depth_limit {
        return Err(ChainDbError::ForkTooDeep { limit: depth_limit });
    }
    Ok(())
}

/// Every ancestor below a stored head must itself be stored (headers are only
/// inserted on top of their parent), so a miss here is corruption.
fn stored_parent(db: &HeaderDb, header: &BlockHeader) -> ChainDbResult<BlockHeader> {
    db.lookup_by_key(header.height - 1, header.parent_hash)?.ok_or_else(|| ChainDbError::Corruption {
        op: "reorg_transactions",
        id: header.parent_hash,
        reason: format!("parent of stored header {} is missing", header.hash),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ChainId;
    use crate::test_helpers::{child_header, genesis_header, insert_chain};
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::collections::HashMap;
    use weft_database::create_temp_db;
    use weft_database::prelude::ConnBuilder;

    /// Payload lookup backed by an in-memory map keyed by block hash.
    fn payloads_from(map: &HashMap<Hash, Vec<u64>>) -> impl FnMut(&BlockHeader) -> HashSet<Hash> + '_ {
        |header| map.get(&header.hash).map(|txs| txs.iter().map(|&tx| Hash::from_u64_word(tx)).collect()).unwrap_or_default()
    }

    fn tx_set(words: impl IntoIterator<Item = u64>) -> HashSet<Hash> {
        words.into_iter().map(Hash::from_u64_word).collect()
    }

    #[test]
    fn test_simple_fork_scenario() {
        let (_lifetime, db) = create_temp_db!(ConnBuilder::default().with_files_limit(10));
        let genesis = genesis_header(ChainId(0));
        let store = HeaderDb::open(db.clone(), genesis.clone()).unwrap();

        // G-A-B-C with a sibling D' of C on top of B
        let chain = insert_chain(&store, &genesis, 3);
        let fork = child_header(&chain[2], 0xd0);
        store.insert(&fork).unwrap();

        let payloads = HashMap::from([(chain[3].hash, vec![1, 2]), (fork.hash, vec![2, 3])]);
        let returned = reorg_transactions(&store, &fork, &chain[3], payloads_from(&payloads)).unwrap();
        assert_eq!(returned, tx_set([1]));

        // Reorging back reintroduces the fork's unique transaction
        let returned = reorg_transactions(&store, &chain[3], &fork, payloads_from(&payloads)).unwrap();
        assert_eq!(returned, tx_set([3]));
    }

    #[test]
    fn test_deep_fork_scenario() {
        let (_lifetime, db) = create_temp_db!(ConnBuilder::default().with_files_limit(10));
        let genesis = genesis_header(ChainId(0));
        let store = HeaderDb::open(db.clone(), genesis.clone()).unwrap();

        // A chain of 10, then two branches of lengths 5 and 8 off its tip
        let trunk = insert_chain(&store, &genesis, 10);
        let mut payloads = HashMap::new();
        let mut tx = 0u64;

        let mut grow = |base: &BlockHeader, len: usize, salt: u64| {
            let mut cursor = base.clone();
            for i in 0..len {
                let header = child_header(&cursor, salt + i as u64);
                store.insert(&header).unwrap();
                payloads.insert(header.hash, vec![tx, tx + 1]);
                tx += 2;
                cursor = header;
            }
            cursor
        };
        let short_tip = grow(&trunk[10], 5, 0x1000);
        let long_tip = grow(&trunk[10], 8, 0x2000);

        // Branch transaction sets are disjoint, so adopting the long branch
        // returns exactly the short branch's transactions.
        let expected = tx_set(0..10);
        let returned = reorg_transactions(&store, &long_tip, &short_tip, payloads_from(&payloads)).unwrap();
        assert_eq!(returned, expected);
    }

    #[test]
    fn test_extension_is_not_a_reorg() {
        let (_lifetime, db) = create_temp_db!(ConnBuilder::default().with_files_limit(10));
        let genesis = genesis_header(ChainId(0));
        let store = HeaderDb::open(db.clone(), genesis.clone()).unwrap();
        let chain = insert_chain(&store, &genesis, 6);

        // Old head is an ancestor of the new head: nothing to reintroduce
        let payloads = HashMap::from([(chain[5].hash, vec![9]), (chain[6].hash, vec![8])]);
        let returned = reorg_transactions(&store, &chain[6], &chain[2], payloads_from(&payloads)).unwrap();
        assert!(returned.is_empty());

        // Same head on both sides is a no-op
        let returned = reorg_transactions(&store, &chain[6], &chain[6], payloads_from(&payloads)).unwrap();
        assert!(returned.is_empty());
    }

    #[test]
    fn test_missing_head() {
        let (_lifetime, db) = create_temp_db!(ConnBuilder::default().with_files_limit(10));
        let genesis = genesis_header(ChainId(0));
        let store = HeaderDb::open(db.clone(), genesis.clone()).unwrap();
        let chain = insert_chain(&store, &genesis, 2);

        let stranger = child_header(&chain[1], 0x5555);
        let payloads = HashMap::new();
        assert!(matches!(
            reorg_transactions(&store, &stranger, &chain[2], payloads_from(&payloads)),
            Err(ChainDbError::MissingHead(hash)) if hash == stranger.hash
        ));
        assert!(matches!(
            reorg_transactions(&store, &chain[2], &stranger, payloads_from(&payloads)),
            Err(ChainDbError::MissingHead(hash)) if hash == stranger.hash
        ));
    }

    #[test]
    fn test_fork_too_deep() {
        let (_lifetime, db) = create_temp_db!(ConnBuilder::default().with_files_limit(10));
        let genesis = genesis_header(ChainId(0));
        let store = HeaderDb::open(db.clone(), genesis.clone()).unwrap();

        let trunk = insert_chain(&store, &genesis, 1);
        let mut payloads = HashMap::new();
        let mut grow = |base: &BlockHeader, len: usize, salt: u64| {
            let mut cursor = base.clone();
            for i in 0..len {
                let header = child_header(&cursor, salt + i as u64);
                store.insert(&header).unwrap();
                cursor = header;
            }
            cursor
        };
        let old_tip = grow(&trunk[1], 10, 0x100);
        let new_tip = grow(&trunk[1], 10, 0x200);
        payloads.insert(old_tip.hash, vec![1]);

        assert!(matches!(
            reorg_transactions_bounded(&store, &new_tip, &old_tip, payloads_from(&payloads), 3),
            Err(ChainDbError::ForkTooDeep { limit: 3 })
        ));
        assert!(reorg_transactions_bounded(&store, &new_tip, &old_tip, payloads_from(&payloads), 10).is_ok());
    }

    #[test]
    fn test_fork_too_deep_on_old_branch() {
        let (_lifetime, db) = create_temp_db!(ConnBuilder::default().with_files_limit(10));
        let genesis = genesis_header(ChainId(0));
        let store = HeaderDb::open(db.clone(), genesis.clone()).unwrap();

        let trunk = insert_chain(&store, &genesis, 1);
        let mut grow = |base: &BlockHeader, len: usize, salt: u64| {
            let mut cursor = base.clone();
            for i in 0..len {
                let header = child_header(&cursor, salt + i as u64);
                store.insert(&header).unwrap();
                cursor = header;
            }
            cursor
        };
        // The abandoned branch is much deeper than the adopted one, so the
        // bound must trip on the old side of the lockstep walk.
        let old_tip = grow(&trunk[1], 8, 0x300);
        let new_tip = grow(&trunk[1], 3, 0x400);
        let payloads = HashMap::new();

        assert!(matches!(
            reorg_transactions_bounded(&store, &new_tip, &old_tip, payloads_from(&payloads), 6),
            Err(ChainDbError::ForkTooDeep { limit: 6 })
        ));
        assert!(reorg_transactions_bounded(&store, &new_tip, &old_tip, payloads_from(&payloads), 8).is_ok());
    }

    #[test]
    fn test_random_forks_validity_and_no_orphans() {
        let mut rng = StdRng::seed_from_u64(0xf0f0);
        for case in 0..12 {
            let (_lifetime, db) = create_temp_db!(ConnBuilder::default().with_files_limit(10));
            let genesis = genesis_header(ChainId(0));
            let store = HeaderDb::open(db.clone(), genesis.clone()).unwrap();

            let trunk = insert_chain(&store, &genesis, rng.gen_range(1..8));
            let fork_base = trunk[rng.gen_range(0..trunk.len())].clone();

            // Grow two branches off the fork base with randomly overlapping
            // transaction sets.
            let mut payloads: HashMap<Hash, Vec<u64>> = HashMap::new();
            let mut grow = |base: &BlockHeader, len: usize, salt: u64, rng: &mut StdRng| {
                let mut headers = Vec::new();
                let mut cursor = base.clone();
                for i in 0..len {
                    let header = child_header(&cursor, salt + i as u64);
                    store.insert(&header).unwrap();
                    payloads.insert(header.hash, (0..rng.gen_range(0..5)).map(|_| rng.gen_range(0..32)).collect());
                    headers.push(header.clone());
                    cursor = header;
                }
                headers
            };
            let old_branch = grow(&fork_base, rng.gen_range(1..7), 0x10_000 + case, &mut rng);
            let new_branch = grow(&fork_base, rng.gen_range(1..7), 0x20_000 + case, &mut rng);

            let old_txs: HashSet<Hash> =
                old_branch.iter().flat_map(|header| payloads[&header.hash].iter().map(|&tx| Hash::from_u64_word(tx))).collect();
            let new_txs: HashSet<Hash> =
                new_branch.iter().flat_map(|header| payloads[&header.hash].iter().map(|&tx| Hash::from_u64_word(tx))).collect();

            let returned = reorg_transactions(
                &store,
                new_branch.last().unwrap(),
                old_branch.last().unwrap(),
                payloads_from(&payloads),
            )
            .unwrap();

            // Validity: returned txs come from the old branch and avoid the new one
            assert!(returned.is_subset(&old_txs), "case {case}: returned txs outside the old branch");
            assert!(returned.is_disjoint(&new_txs), "case {case}: returned txs present on the new branch");
            // No orphans: everything unique to the old branch is returned
            let expected: HashSet<Hash> = old_txs.difference(&new_txs).copied().collect();
            assert_eq!(returned, expected, "case {case}: orphaned transactions");
        }
    }
}
