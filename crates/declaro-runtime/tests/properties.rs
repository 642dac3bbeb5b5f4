//! Property tests for batching and equality suppression.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use serde_json::json;

use declaro_core::{StateDef, ValueType};
use declaro_runtime::{values_equal, EventBus, ReactiveGraph, RuntimeConfig};

const IDS: [&str; 4] = ["a", "b", "c", "d"];

fn graph() -> ReactiveGraph {
    let g = ReactiveGraph::new(RuntimeConfig::default(), EventBus::new());
    for id in IDS {
        g.define_state(id, StateDef::new(ValueType::Number, json!(0)))
            .unwrap();
    }
    g
}

proptest! {
    /// Within one batch, each touched identifier is notified exactly once,
    /// after the batch, in first-dirtied order.
    #[test]
    fn batch_flushes_once_in_first_dirtied_order(
        writes in prop::collection::vec((0usize..IDS.len(), 1i64..100), 0..40)
    ) {
        let g = graph();
        let log = Rc::new(RefCell::new(Vec::new()));
        for id in IDS {
            let l = log.clone();
            let _ = g.subscribe(id, move || l.borrow_mut().push(id));
        }

        let mut current = [0i64; 4];
        let mut expected: Vec<&str> = Vec::new();
        g.batch(|| {
            for (slot, value) in &writes {
                g.set(IDS[*slot], json!(value)).unwrap();
                if current[*slot] != *value {
                    current[*slot] = *value;
                    if !expected.contains(&IDS[*slot]) {
                        expected.push(IDS[*slot]);
                    }
                }
            }
            prop_assert!(log.borrow().is_empty());
            Ok(())
        })
        .unwrap()?;

        prop_assert_eq!(&*log.borrow(), &expected);
    }

    /// Writing the current value never notifies.
    #[test]
    fn equal_write_is_silent(value in -1000i64..1000) {
        let g = graph();
        g.set("a", json!(value)).unwrap();

        let log = Rc::new(RefCell::new(0usize));
        let l = log.clone();
        let _ = g.subscribe("a", move || *l.borrow_mut() += 1);

        g.set("a", json!(value)).unwrap();
        g.set("a", json!(value as f64)).unwrap();
        prop_assert_eq!(*log.borrow(), 0);
    }

    /// Structural equality is reflexive and ignores integer/float spelling.
    #[test]
    fn equality_is_structural(items in prop::collection::vec(-50i64..50, 0..10)) {
        let ints = json!(items);
        let floats = json!(items.iter().map(|n| *n as f64).collect::<Vec<_>>());
        prop_assert!(values_equal(&ints, &ints));
        prop_assert!(values_equal(&ints, &floats));

        let mut longer = items.clone();
        longer.push(0);
        prop_assert!(!values_equal(&ints, &json!(longer)));
    }
}
