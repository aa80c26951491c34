use attrbit::*;
use std::sync::Arc;

fn attr(
    id: &str,
    owner: &str,
    multiplicity: Multiplicity,
    ordered: bool,
    mandatory: bool,
    value_type: ValueType,
) -> AttributeDescriptor {
    AttributeDescriptor {
        id: id.to_string(),
        name: id.rsplit('#').next().unwrap_or(id).to_string(),
        owner_type: owner.to_string(),
        multiplicity,
        ordered,
        bag: false,
        mandatory,
        composite: false,
        value_type,
    }
}

/// A project-tracker model exercising one strategy of each storage family.
fn model() -> Vec<(AttributeDescriptor, StorageConfig)> {
    vec![
        (
            attr("Project#name", "Project", Multiplicity::Single, false, true, ValueType::Text),
            StorageConfig::Column { column: "name".to_string() },
        ),
        (
            attr("Project#tags", "Project", Multiplicity::Multiple, false, false, ValueType::Text),
            StorageConfig::JsonColumn { column: "tags".to_string() },
        ),
        (
            attr(
                "Project#lead",
                "Project",
                Multiplicity::Single,
                false,
                false,
                ValueType::Item("Person".to_string()),
            ),
            StorageConfig::ForeignKey { column: "lead".to_string() },
        ),
        (
            attr(
                "Project#members",
                "Project",
                Multiplicity::Multiple,
                false,
                false,
                ValueType::Item("Person".to_string()),
            ),
            StorageConfig::LinkSet { table: "hasValue".to_string(), monomorphic: false },
        ),
        (
            attr(
                "Project#milestones",
                "Project",
                Multiplicity::Multiple,
                true,
                false,
                ValueType::Item("Milestone".to_string()),
            ),
            StorageConfig::LinkList { table: "hasValue".to_string(), monomorphic: false },
        ),
        (
            attr(
                "Project#documents",
                "Project",
                Multiplicity::Multiple,
                false,
                false,
                ValueType::Item("Document".to_string()),
            ),
            StorageConfig::InlineSet {
                container_column: "project".to_string(),
                definition_column: Some("projectAttr".to_string()),
            },
        ),
        (
            attr(
                "Person#projects",
                "Person",
                Multiplicity::Multiple,
                false,
                false,
                ValueType::Item("Project".to_string()),
            ),
            StorageConfig::ReverseNavigation { opposite: "Project#members".to_string() },
        ),
        (
            attr("Project#summary", "Project", Multiplicity::Single, false, false, ValueType::Text),
            StorageConfig::Derived { algorithm: "summary".to_string() },
        ),
    ]
}

struct Summary;

impl DerivedAlgorithm for Summary {
    fn compute(&self, store: &dyn ItemStore, item: &ItemKey) -> Result<AttrValue, StorageError> {
        match store.column(item, "name")? {
            Some(StorageValue::Text(name)) => Ok(AttrValue::Text(format!("Project {}", name))),
            _ => Ok(AttrValue::Null),
        }
    }
}

fn algorithms() -> AlgorithmTable {
    let mut table = AlgorithmTable::new();
    table.register("summary", Arc::new(Summary));
    table
}

fn persons(ids: &[u64]) -> AttrValue {
    AttrValue::Collection(ids.iter().map(|id| AttrValue::Item(ItemKey::new("Person", *id))).collect())
}

#[test]
fn bound_model_end_to_end_on_mem_store() {
    let store = MemStore::new();
    store.declare_type("Project", &["name", "tags", "lead"]);
    let table = bind(&model(), &algorithms()).unwrap();
    let project = ItemKey::new("Project", 1);

    table
        .resolve("Project#name")
        .unwrap()
        .write(&store, &project, AttrValue::Text("Apollo".to_string()))
        .unwrap();
    table
        .resolve("Project#lead")
        .unwrap()
        .write(&store, &project, AttrValue::Item(ItemKey::new("Person", 1)))
        .unwrap();
    table.resolve("Project#members").unwrap().write(&store, &project, persons(&[1, 2])).unwrap();

    assert_eq!(
        table.resolve("Project#name").unwrap().read(&store, &project).unwrap(),
        AttrValue::Text("Apollo".to_string())
    );
    assert_eq!(
        table.resolve("Project#members").unwrap().read(&store, &project).unwrap(),
        persons(&[1, 2])
    );
    // The derived attribute computes from the persisted name.
    assert_eq!(
        table.resolve("Project#summary").unwrap().read(&store, &project).unwrap(),
        AttrValue::Text("Project Apollo".to_string())
    );
}

#[test]
fn reverse_navigation_tracks_the_forward_attribute() {
    let store = MemStore::new();
    let table = bind(&model(), &algorithms()).unwrap();
    let members = table.resolve("Project#members").unwrap();
    let projects = table.resolve("Person#projects").unwrap();
    let person = ItemKey::new("Person", 1);

    members.write(&store, &ItemKey::new("Project", 1), persons(&[1])).unwrap();
    members.write(&store, &ItemKey::new("Project", 2), persons(&[1, 2])).unwrap();

    assert_eq!(
        projects.read(&store, &person).unwrap(),
        AttrValue::Collection(vec![
            AttrValue::Item(ItemKey::new("Project", 1)),
            AttrValue::Item(ItemKey::new("Project", 2)),
        ])
    );

    members.remove(&store, &ItemKey::new("Project", 1), &AttrValue::Item(person.clone())).unwrap();
    assert_eq!(
        projects.read(&store, &person).unwrap(),
        AttrValue::Collection(vec![AttrValue::Item(ItemKey::new("Project", 2))])
    );

    let err = projects.write(&store, &person, persons(&[])).unwrap_err();
    assert!(matches!(err.violation(), Some(Violation::ReadOnly { .. })));
}

#[test]
fn shared_link_table_keeps_set_and_list_apart() {
    let store = MemStore::new();
    let table = bind(&model(), &algorithms()).unwrap();
    let members = table.resolve("Project#members").unwrap();
    let milestones = table.resolve("Project#milestones").unwrap();
    let project = ItemKey::new("Project", 1);

    members.write(&store, &project, persons(&[1, 2])).unwrap();
    milestones
        .write(
            &store,
            &project,
            AttrValue::Collection(vec![
                AttrValue::Item(ItemKey::new("Milestone", 9)),
                AttrValue::Item(ItemKey::new("Milestone", 3)),
            ]),
        )
        .unwrap();

    assert_eq!(members.read(&store, &project).unwrap(), persons(&[1, 2]));
    // The list keeps its own order despite sharing the physical table.
    assert_eq!(
        milestones.read(&store, &project).unwrap(),
        AttrValue::Collection(vec![
            AttrValue::Item(ItemKey::new("Milestone", 9)),
            AttrValue::Item(ItemKey::new("Milestone", 3)),
        ])
    );
}

#[test]
fn ordered_rewrite_touches_only_changed_positions() {
    let store = CountingStore::new(MemStore::new());
    let table = bind(&model(), &algorithms()).unwrap();
    let milestones = table.resolve("Project#milestones").unwrap();
    let project = ItemKey::new("Project", 1);
    let list = |ids: &[u64]| {
        AttrValue::Collection(
            ids.iter().map(|id| AttrValue::Item(ItemKey::new("Milestone", *id))).collect(),
        )
    };

    milestones.write(&store, &project, list(&[1, 2, 3, 4])).unwrap();
    store.ops.reset();
    // Swap one element in the middle.
    milestones.write(&store, &project, list(&[1, 7, 3, 4])).unwrap();
    assert_eq!(store.ops.link_churn(), 2);
    assert_eq!(milestones.read(&store, &project).unwrap(), list(&[1, 7, 3, 4]));
}

#[test]
fn inline_membership_is_exclusive_across_projects() {
    let store = MemStore::new();
    let table = bind(&model(), &algorithms()).unwrap();
    let documents = table.resolve("Project#documents").unwrap();
    let doc = AttrValue::Item(ItemKey::new("Document", 1));

    documents.add(&store, &ItemKey::new("Project", 1), doc.clone()).unwrap();
    let err = documents.add(&store, &ItemKey::new("Project", 2), doc.clone()).unwrap_err();
    match err.violation() {
        Some(Violation::OwnershipConflict { current_owner, .. }) => {
            assert_eq!(current_owner, "Project#1");
        }
        other => panic!("expected ownership conflict, got {:?}", other),
    }

    assert!(documents.supports_live_view());
    let view = documents.live_view(&store, &ItemKey::new("Project", 1)).unwrap().unwrap();
    assert!(view.contains(&doc).unwrap());
}

#[test]
fn mandatory_single_value_cannot_be_cleared() {
    let store = MemStore::new();
    let table = bind(&model(), &algorithms()).unwrap();
    let name = table.resolve("Project#name").unwrap();
    let project = ItemKey::new("Project", 1);
    name.write(&store, &project, AttrValue::Text("Apollo".to_string())).unwrap();
    let err = name.write(&store, &project, AttrValue::Null).unwrap_err();
    assert!(matches!(err.violation(), Some(Violation::MandatoryEmpty { .. })));
    assert_eq!(name.read(&store, &project).unwrap(), AttrValue::Text("Apollo".to_string()));
}

#[test]
fn bound_model_end_to_end_on_redb_store() {
    let store = RedbStore::temp("strategy_test").unwrap();
    store.declare_type("Project", &["name", "tags", "lead"]);
    let table = bind(&model(), &algorithms()).unwrap();
    let project = ItemKey::new("Project", 1);

    table
        .resolve("Project#name")
        .unwrap()
        .write(&store, &project, AttrValue::Text("Apollo".to_string()))
        .unwrap();
    table
        .resolve("Project#tags")
        .unwrap()
        .write(
            &store,
            &project,
            AttrValue::Collection(vec![
                AttrValue::Text("space".to_string()),
                AttrValue::Text("active".to_string()),
            ]),
        )
        .unwrap();
    table.resolve("Project#members").unwrap().write(&store, &project, persons(&[1, 2])).unwrap();

    assert_eq!(
        table.resolve("Project#name").unwrap().read(&store, &project).unwrap(),
        AttrValue::Text("Apollo".to_string())
    );
    assert_eq!(
        table.resolve("Project#tags").unwrap().read(&store, &project).unwrap(),
        AttrValue::Collection(vec![
            AttrValue::Text("space".to_string()),
            AttrValue::Text("active".to_string()),
        ])
    );
    assert_eq!(
        table.resolve("Project#members").unwrap().read(&store, &project).unwrap(),
        persons(&[1, 2])
    );
    assert_eq!(
        table.resolve("Project#members").unwrap().referrers(&store, &ItemKey::new("Person", 1)).unwrap(),
        vec![project.clone()]
    );
}

#[test]
fn preload_contributions_cover_every_persistent_attribute() {
    let store = MemStore::new();
    let table = bind(&model(), &algorithms()).unwrap();
    let project = ItemKey::new("Project", 1);

    for (id, strategy) in table.iter() {
        if let Some(contribution) = strategy.preload_contribution() {
            store.preload(&contribution, std::slice::from_ref(&project)).unwrap();
        } else {
            // Only computed attributes may opt out of preloading.
            assert!(strategy.is_derived(), "{} has no preload contribution", id);
        }
    }
}
