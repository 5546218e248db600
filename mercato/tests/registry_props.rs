use std::collections::HashSet;

use proptest::prelude::*;

use mercato::registry::{ConnId, SubscriptionRegistry};
use mercato_types::{StreamKind, ViewKey};

#[derive(Debug, Clone)]
enum Op {
    Register(u8, u8),
    UnregisterOne(u8, u8),
    UnregisterAll(u8),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6, 0u8..6).prop_map(|(c, v)| Op::Register(c, v)),
        (0u8..6, 0u8..6).prop_map(|(c, v)| Op::UnregisterOne(c, v)),
        (0u8..6).prop_map(Op::UnregisterAll),
    ]
}

fn view(idx: u8) -> ViewKey {
    let symbols = ["BTC/USDT", "ETH/USDT", "SOL/USDT"];
    let symbol = symbols[usize::from(idx) % symbols.len()];
    if idx % 2 == 0 {
        ViewKey::new("crypto", "binance", symbol, StreamKind::Trades, None, None).unwrap()
    } else {
        ViewKey::new(
            "crypto",
            "binance",
            symbol,
            StreamKind::Ohlcv,
            Some("1m"),
            None,
        )
        .unwrap()
    }
}

proptest! {
    // After every operation the biconditional holds:
    // view ∈ keys_of(conn) ⇔ conn ∈ subscribers_of(view),
    // and the registry agrees with a flat model of live pairs.
    #[test]
    fn bidirectional_maps_stay_consistent(ops in proptest::collection::vec(arb_op(), 1..80)) {
        let registry = SubscriptionRegistry::new();
        let mut model: HashSet<(u8, u8)> = HashSet::new();

        for op in ops {
            match op {
                Op::Register(c, v) => {
                    let was_new = registry.register(ConnId::from_raw(u64::from(c)), view(v));
                    prop_assert_eq!(was_new, model.insert((c, v)));
                }
                Op::UnregisterOne(c, v) => {
                    let removed =
                        registry.unregister_one(ConnId::from_raw(u64::from(c)), &view(v));
                    prop_assert_eq!(removed, model.remove(&(c, v)));
                }
                Op::UnregisterAll(c) => {
                    let removed = registry.unregister_all(ConnId::from_raw(u64::from(c)));
                    let expected: Vec<u8> = model
                        .iter()
                        .filter(|(mc, _)| *mc == c)
                        .map(|(_, v)| *v)
                        .collect();
                    prop_assert_eq!(removed.len(), expected.len());
                    model.retain(|(mc, _)| *mc != c);
                }
            }

            // Biconditional, checked over the whole id space in play.
            for c in 0u8..6 {
                let conn = ConnId::from_raw(u64::from(c));
                let held = registry.keys_of(conn);
                for v in 0u8..6 {
                    let in_keys = held.contains(&view(v));
                    let in_subs = registry.subscribers_of(&view(v)).contains(&conn);
                    prop_assert_eq!(in_keys, in_subs);
                    prop_assert_eq!(in_keys, model.contains(&(c, v)));
                }
            }

            // No empty buckets linger on either side.
            let live_views: HashSet<ViewKey> =
                model.iter().map(|(_, v)| view(*v)).collect();
            prop_assert_eq!(registry.active_views(), live_views);
            let live_conns: HashSet<u8> = model.iter().map(|(c, _)| *c).collect();
            prop_assert_eq!(registry.connection_count(), live_conns.len());
        }
    }
}
