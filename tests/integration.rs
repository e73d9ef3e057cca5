use hiercube::cube::{
    AggregationConfig, Bone, ChildrenLink, CubeAggregator, CubeError, Dimension, NodeSelection,
    ParentLink, Skeleton, SkeletonFactory, Status, Sum, ValuedSkeleton,
};
use proptest::{prelude::*, sample::Index};

/// One root with a single child, under which a balanced binary tree ends in
/// four leaves. Labels are dotted paths ("0.1.2.1"), and each leaf is valued
/// with the sum of its path components.
fn dotted_binary_tree() -> Dimension {
    let links = vec![
        ChildrenLink::new("0", vec!["0.1"], "0"),
        ChildrenLink::new("0.1", vec!["0.1.1", "0.1.2"], "0.1"),
        ChildrenLink::new("0.1.1", vec!["0.1.1.1", "0.1.1.2"], "0.1.1"),
        ChildrenLink::new("0.1.2", vec!["0.1.2.1", "0.1.2.2"], "0.1.2"),
    ];
    Dimension::from_children_links("path", links).unwrap()
}

fn path_sum(label: &str) -> f64 {
    label.split('.').map(|c| c.parse::<f64>().unwrap()).sum()
}

#[test]
fn test_dotted_tree_strategies_agree_below_root() {
    let dim = dotted_binary_tree();
    assert_eq!(dim.roots().len(), 1);
    assert_eq!(dim.leaves().len(), 4);
    assert_eq!(dim.len(), 8);

    let observations: Vec<ValuedSkeleton<f64>> = dim
        .leaves()
        .map(|leaf| {
            let value = path_sum(leaf.label());
            ValuedSkeleton::new(Skeleton::new([leaf]).unwrap(), value)
        })
        .collect();

    let child = Skeleton::new([dim.find("0.1").unwrap()]).unwrap();
    let engine = CubeAggregator::new(Sum, Sum);

    let closure = engine.aggregate(&observations);
    assert!(closure.is_ok());
    let from_closure = closure
        .results()
        .iter()
        .find(|r| r.skeleton == child)
        .and_then(|r| r.value)
        .unwrap();
    // 3 + 4 + 4 + 5
    assert_eq!(from_closure, 16.0);

    let targeted = engine.aggregate_targets(&observations, std::slice::from_ref(&child));
    assert!(targeted.is_ok());
    assert_eq!(targeted.results().len(), 1);
    assert_eq!(targeted.results()[0].skeleton, child);
    assert_eq!(targeted.results()[0].value, Some(from_closure));
}

#[test]
fn test_empty_dimension() {
    let dim = Dimension::from_parent_links::<u32>("empty", Vec::new()).unwrap();
    assert!(dim.is_empty());
    assert_eq!(dim.roots().len(), 0);
    assert!(Dimension::empty("also-empty").unwrap().is_empty());
}

#[test]
fn test_unresolvable_label() {
    let dims = vec![dotted_binary_tree()];
    let factory = SkeletonFactory::new(&dims).unwrap();
    let records = vec!["0.1.1.1", "9.9"];
    match factory.skeletons(&records, |r, _| *r) {
        Err(CubeError::MissingValue { label, dimension }) => {
            assert_eq!(label, "9.9");
            assert_eq!(dimension, "path");
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn test_empty_targets() {
    let dim = dotted_binary_tree();
    let obs = vec![ValuedSkeleton::new(
        Skeleton::new([dim.find("0.1.1.1").unwrap()]).unwrap(),
        1.0,
    )];
    let result = CubeAggregator::new(Sum, Sum).aggregate_targets(&obs, &[]);
    assert_eq!(result.status(), Status::NotRun);
    assert!(result.results().is_empty());
}

#[test]
fn test_sales_cube_end_to_end() {
    struct Sale {
        city: &'static str,
        month: &'static str,
        amount: f64,
    }

    let geo = Dimension::from_parent_links(
        "geo",
        vec![
            ParentLink::new("fr", None, "France"),
            ParentLink::new("par", Some("fr"), "Paris"),
            ParentLink::new("lyo", Some("fr"), "Lyon"),
        ],
    )
    .unwrap();
    let time = Dimension::from_parent_links(
        "time",
        vec![
            ParentLink::new("q1", None, "Q1"),
            ParentLink::new("jan", Some("q1"), "Jan"),
            ParentLink::new("feb", Some("q1"), "Feb"),
        ],
    )
    .unwrap();
    let dims = vec![geo, time];

    let sales = vec![
        Sale { city: "Paris", month: "Jan", amount: 10.0 },
        Sale { city: "Paris", month: "Feb", amount: 5.0 },
        Sale { city: "Lyon", month: "Jan", amount: 7.0 },
        Sale { city: "Lyon", month: "Jan", amount: 1.0 },
    ];
    let observations = SkeletonFactory::new(&dims)
        .unwrap()
        .observations(
            &sales,
            |s, dim| if dim == "geo" { s.city } else { s.month },
            |s| s.amount,
        )
        .unwrap();

    let targets: Vec<Skeleton> = Skeleton::combine(&dims, NodeSelection::Roots)
        .unwrap()
        .chain(Skeleton::combine(&dims, NodeSelection::Leaves).unwrap())
        .collect();
    assert_eq!(targets.len(), 5);

    let engine = CubeAggregator::new(Sum, Sum)
        .with_config(AggregationConfig::default().with_threshold(1));
    let result = engine.aggregate_targets(&observations, &targets);
    assert!(result.is_ok(), "{:?}", result.message());

    let rendered: Vec<String> = result
        .results()
        .iter()
        .map(|r| format!("{} = {}", r.skeleton, r.value.unwrap()))
        .collect();
    assert_eq!(
        rendered,
        vec![
            "(geo:France, time:Q1) = 23",
            "(geo:Lyon, time:Jan) = 8",
            "(geo:Paris, time:Feb) = 5",
            "(geo:Paris, time:Jan) = 10",
        ]
    );
}

/// Random forest; labels are drawn from a small pool so that the same label
/// regularly shows up under different parents
fn dimension_strategy(name: &'static str) -> impl Strategy<Value = Dimension> {
    prop::collection::vec((any::<bool>(), any::<Index>(), 0u8..4), 1..10).prop_map(move |nodes| {
        let links = nodes.iter().enumerate().map(|(i, (is_root, parent, tag))| {
            let parent = (i > 0 && !*is_root).then(|| parent.index(i));
            // Label and weight are tied so that merged siblings never disagree
            ParentLink::new(i, parent, format!("{name}{tag}")).with_weight(f64::from(*tag + 1) * 0.5)
        });
        Dimension::from_parent_links(name, links).unwrap()
    })
}

fn cube_strategy() -> impl Strategy<Value = (Vec<Dimension>, Vec<ValuedSkeleton<f64>>)> {
    (
        dimension_strategy("geo"),
        dimension_strategy("time"),
        prop::collection::vec((any::<Index>(), any::<Index>(), -100i32..100), 1..30),
    )
        .prop_map(|(geo, time, raw)| {
            let geo_nodes: Vec<Bone> = geo.nodes().collect();
            let time_nodes: Vec<Bone> = time.nodes().collect();
            let observations = raw
                .into_iter()
                .map(|(g, t, v)| {
                    let skeleton =
                        Skeleton::new([g.get(&geo_nodes).clone(), t.get(&time_nodes).clone()])
                            .unwrap();
                    ValuedSkeleton::new(skeleton, f64::from(v))
                })
                .collect();
            (vec![geo, time], observations)
        })
}

proptest! {
    #[test]
    fn prop_flattened_length(dim in dimension_strategy("d")) {
        let from_roots: usize = dim.roots().map(|r| 1 + r.descendant_count()).sum();
        prop_assert_eq!(dim.len(), from_roots);
        for node in dim.nodes() {
            let top = node.ancestors().last().unwrap();
            prop_assert!(top.is_root());
            prop_assert!(dim.roots().any(|r| r == top));
        }
    }

    #[test]
    fn prop_ancestor_set_size((_, observations) in cube_strategy()) {
        for obs in &observations {
            let c = &obs.skeleton;
            let expected: usize = c.bones().iter().map(Bone::ancestor_count).product();
            let ancestors: Vec<Skeleton> = c.ancestors().unwrap().collect();
            prop_assert_eq!(ancestors.len(), expected);
            prop_assert!(ancestors.contains(c));
        }
    }

    #[test]
    fn prop_resulting_weight((_, observations) in cube_strategy()) {
        for obs in &observations {
            let c = &obs.skeleton;
            prop_assert_eq!(c.resulting_weight(c).unwrap(), 1.0);
            for ancestor in c.ancestors().unwrap() {
                let per_dimension: f64 = c
                    .bones()
                    .iter()
                    .zip(ancestor.bones())
                    .map(|(b, a)| {
                        b.ancestors()
                            .take_while(|x| x != a)
                            .map(|x| x.weight())
                            .product::<f64>()
                    })
                    .product();
                prop_assert_eq!(c.resulting_weight(&ancestor).unwrap(), per_dimension);
            }
        }
    }

    #[test]
    fn prop_stripped_has_no_ancestors((_, observations) in cube_strategy()) {
        for obs in &observations {
            prop_assert_eq!(obs.skeleton.strip_hierarchy().ancestors().unwrap().len(), 1);
        }
    }

    #[test]
    fn prop_strategies_agree((dims, observations) in cube_strategy()) {
        let engine = CubeAggregator::new(Sum, Sum);
        let closure = engine.aggregate(&observations);
        let targets: Vec<Skeleton> = Skeleton::combine(&dims, NodeSelection::All).unwrap().collect();
        let targeted = engine.aggregate_targets(&observations, &targets);
        prop_assert!(closure.is_ok());
        prop_assert!(targeted.is_ok());
        prop_assert_eq!(closure.results(), targeted.results());
    }

    #[test]
    fn prop_reruns_are_identical((_, observations) in cube_strategy()) {
        let engine = CubeAggregator::new(Sum, Sum)
            .with_config(AggregationConfig::default().with_threshold(1));
        let first = engine.aggregate(&observations);
        let second = engine.aggregate(&observations);
        prop_assert_eq!(first.results(), second.results());
    }

    #[test]
    fn prop_reruns_agree_across_builds((dims, observations) in cube_strategy()) {
        // Same hierarchies, rebuilt from scratch under fresh keys
        let fresh: Vec<Dimension> = dims
            .iter()
            .map(|dim| {
                let nodes: Vec<Bone> = dim.nodes().collect();
                let links = nodes.iter().enumerate().map(|(i, b)| {
                    let parent = b.parent().and_then(|p| nodes.iter().position(|n| *n == p));
                    ParentLink::new(i, parent, b.label()).with_weight(b.weight())
                });
                Dimension::from_parent_links(dim.name(), links).unwrap()
            })
            .collect();
        let rebuilt: Vec<ValuedSkeleton<f64>> = observations
            .iter()
            .map(|obs| {
                let twins = obs.skeleton.bones().iter().map(|own| {
                    fresh
                        .iter()
                        .flat_map(|d| d.nodes())
                        .find(|n| n == own)
                        .unwrap()
                });
                ValuedSkeleton { skeleton: Skeleton::new(twins).unwrap(), value: obs.value }
            })
            .collect();

        let engine = CubeAggregator::new(Sum, Sum);
        let original = engine.aggregate(&observations);
        let again = engine.aggregate(&rebuilt);
        prop_assert_eq!(original.results(), again.results());
    }
}
