use std::time::{Duration, Instant};

use anyhow::Result;
use planner::core::graph::TaskGraph;
use planner::core::types::{NodeId, NodeResult, Status};
use planner::io::config::PlannerConfig;
use planner::io::export::{export_tree, load_tree, render_outline, write_tree};
use planner::io::generator::{GenerationRequest, Purpose};
use planner::pipeline::{Phase, PhaseOrderError, PhaseReport, Pipeline};
use planner::session::{SessionError, SessionStore};
use planner::test_support::{
    AreaSpec, ScriptedGenerator, SubtaskSpec, decomposition_text, line_value,
    refinement_keep_text, refinement_split_text, subtask_plan_text,
};

const OBJECTIVE: &str = "Plan a two-week trip to Japan";

/// Three areas; only "Book flight" is split during refinement.
fn trip_responder(request: &GenerationRequest) -> Result<String> {
    match request.purpose {
        Purpose::Decompose => Ok(decomposition_text(
            "Split by what has to be booked, learned and paid for.",
            &[
                AreaSpec {
                    name: "Logistics",
                    description: "Travel and lodging",
                    expected_output: "Bookings",
                    responsibilities: &["Flights", "Hotels"],
                },
                AreaSpec {
                    name: "Culture",
                    description: "Language and customs",
                    expected_output: "Phrase sheet",
                    responsibilities: &["Phrases"],
                },
                AreaSpec {
                    name: "Budget",
                    description: "Money",
                    expected_output: "Cost sheet",
                    responsibilities: &["Estimates"],
                },
            ],
        )),
        Purpose::Plan => {
            let area = line_value(&request.user, "Functional area:").unwrap_or("?");
            let text = match area {
                "Logistics" => subtask_plan_text(
                    area,
                    &[
                        SubtaskSpec::new("Book flight", &[]),
                        SubtaskSpec::new("Book hotel", &["Book flight"]),
                        SubtaskSpec::external("Get visa", &[]),
                    ],
                ),
                "Culture" => subtask_plan_text(area, &[SubtaskSpec::new("Learn phrases", &[])]),
                _ => subtask_plan_text(area, &[SubtaskSpec::new("Estimate costs", &[])]),
            };
            Ok(text)
        }
        Purpose::Refine => {
            let title = line_value(&request.user, "Task title:").unwrap_or("?");
            if title == "Book flight" {
                Ok(refinement_split_text(
                    title,
                    &[
                        SubtaskSpec::new("Compare fares", &[]),
                        SubtaskSpec::new("Buy ticket", &["Compare fares"]),
                    ],
                ))
            } else {
                Ok(refinement_keep_text(title))
            }
        }
        Purpose::Execute => {
            let title = line_value(&request.user, "Task title:").unwrap_or("?");
            Ok(format!("Result for {title}"))
        }
    }
}

fn find(graph: &TaskGraph, title: &str) -> NodeId {
    graph
        .iter()
        .find(|node| node.title == title)
        .map(|node| node.id)
        .unwrap_or_else(|| panic!("no node titled {title}"))
}

fn text_result(graph: &TaskGraph, title: &str) -> String {
    let node = graph.node(find(graph, title)).expect("node");
    node.result
        .as_ref()
        .and_then(NodeResult::as_text)
        .unwrap_or_else(|| panic!("{title} has no text result"))
        .to_string()
}

#[test]
fn trip_runs_end_to_end() {
    let generator = ScriptedGenerator::new(trip_responder);
    let mut pipeline =
        Pipeline::new(OBJECTIVE, "Day-by-day itinerary", PlannerConfig::default()).expect("pipeline");

    let reports = pipeline.run_all(&generator).expect("run");
    assert_eq!(reports.len(), 4);
    assert_eq!(pipeline.completed(), Phase::Executed);
    assert!(!pipeline.degenerate_decomposition());

    let graph = pipeline.graph();
    assert!(graph.check_invariants().is_empty());
    assert!(graph.iter().all(|node| node.status == Status::Done));

    // One decomposition, one plan per area, five subtasks plus the two split
    // children refined, six generated nodes executed.
    assert_eq!(generator.count(Purpose::Decompose), 1);
    assert_eq!(generator.count(Purpose::Plan), 3);
    assert_eq!(generator.count(Purpose::Refine), 7);
    assert_eq!(generator.count(Purpose::Execute), 6);
    assert_eq!(pipeline.records().len(), 7);

    let root = graph.root().expect("root");
    let root_node = graph.node(root).expect("root");
    assert!(root_node.prompt.is_none());
    let Some(NodeResult::Aggregate(areas)) = &root_node.result else {
        panic!("root should aggregate");
    };
    let names: Vec<&str> = areas.keys().map(String::as_str).collect();
    assert_eq!(names, ["Logistics", "Culture", "Budget"]);

    let logistics = graph.node(find(graph, "Logistics")).expect("group");
    assert!(logistics.prompt.is_none());
    assert!(matches!(logistics.result, Some(NodeResult::Aggregate(ref map)) if map.len() == 3));

    assert_eq!(text_result(graph, "Get visa"), "Get visa done");
    assert_eq!(text_result(graph, "Book hotel"), "Result for Book hotel");

    let hotel = graph.node(find(graph, "Book hotel")).expect("hotel");
    let hotel_prompt = &hotel.prompt.as_ref().expect("prompt").user;
    assert!(hotel_prompt.contains("<dependency title=\"Book flight\">"));
    assert!(hotel_prompt.contains("Result for Book flight"));

    let flight = graph.node(find(graph, "Book flight")).expect("flight");
    let flight_prompt = &flight.prompt.as_ref().expect("prompt").user;
    assert!(flight_prompt.contains("<subtask title=\"Compare fares\">"));
    assert!(flight_prompt.contains("<subtask title=\"Buy ticket\">"));
    assert!(flight_prompt.contains("Group: Logistics"));
}

/// Two areas; only Logistics gets a usable plan and nothing is refined.
fn short_trip_responder(request: &GenerationRequest) -> Result<String> {
    match request.purpose {
        Purpose::Decompose => Ok(decomposition_text(
            "Travel first, then fun.",
            &[
                AreaSpec {
                    name: "Logistics",
                    description: "Getting there and staying",
                    expected_output: "Bookings",
                    responsibilities: &["Transport", "Lodging"],
                },
                AreaSpec {
                    name: "Activities",
                    description: "What to do each day",
                    expected_output: "Day plan",
                    responsibilities: &["Sights"],
                },
            ],
        )),
        Purpose::Plan => match line_value(&request.user, "Functional area:") {
            Some("Logistics") => Ok(subtask_plan_text(
                "Logistics",
                &[
                    SubtaskSpec::new("Book flight", &[]),
                    SubtaskSpec::new("Book hotel", &["Book flight"]),
                ],
            )),
            _ => Ok("Nothing to plan here.".to_string()),
        },
        Purpose::Refine => {
            let title = line_value(&request.user, "Task title:").unwrap_or("?");
            Ok(refinement_keep_text(title))
        }
        Purpose::Execute => {
            let title = line_value(&request.user, "Task title:").unwrap_or("?");
            Ok(format!("<result for {title}>"))
        }
    }
}

#[test]
fn three_day_trip_aggregates_every_group() {
    let generator = ScriptedGenerator::new(short_trip_responder);
    let mut pipeline =
        Pipeline::new("plan a 3-day trip", "", PlannerConfig::default()).expect("pipeline");
    pipeline.run_all(&generator).expect("run");
    let graph = pipeline.graph();

    let root = graph.node(graph.root().expect("root")).expect("root");
    let Some(NodeResult::Aggregate(areas)) = &root.result else {
        panic!("root should aggregate");
    };
    assert_eq!(areas.keys().collect::<Vec<_>>(), ["Logistics", "Activities"]);
    // Activities has no subtasks, so it has nothing to report.
    assert_eq!(areas["Activities"], None);

    let expected = NodeResult::Aggregate(
        [
            ("Book flight", "<result for Book flight>"),
            ("Book hotel", "<result for Book hotel>"),
        ]
        .into_iter()
        .map(|(title, result)| (title.to_string(), Some(NodeResult::Text(result.to_string()))))
        .collect(),
    );
    let logistics = graph.node(find(graph, "Logistics")).expect("logistics");
    assert_eq!(logistics.result.as_ref(), Some(&expected));
    assert_eq!(areas["Logistics"].as_ref(), Some(&expected));

    let hotel = graph.node(find(graph, "Book hotel")).expect("hotel");
    let prompt = &hotel.prompt.as_ref().expect("prompt").user;
    assert!(prompt.contains("<dependency title=\"Book flight\">\n<result for Book flight>"));

    assert!(root.prompt.is_none());
    assert!(logistics.prompt.is_none());
    assert_eq!(generator.count(Purpose::Execute), 2);
}

#[test]
fn executor_sees_dependency_results_first() {
    let generator = ScriptedGenerator::new(trip_responder);
    let mut pipeline = Pipeline::new(OBJECTIVE, "", PlannerConfig::default()).expect("pipeline");
    pipeline.run_all(&generator).expect("run");

    let executed: Vec<String> = generator
        .calls()
        .iter()
        .filter(|request| request.purpose == Purpose::Execute)
        .filter_map(|request| line_value(&request.user, "Task title:").map(str::to_string))
        .collect();
    let position = |title: &str| {
        executed
            .iter()
            .position(|t| t == title)
            .unwrap_or_else(|| panic!("{title} never executed"))
    };
    assert!(position("Compare fares") < position("Buy ticket"));
    assert!(position("Buy ticket") < position("Book flight"));
    assert!(position("Book flight") < position("Book hotel"));
}

#[test]
fn refinement_depth_is_bounded() {
    let generator = ScriptedGenerator::new(|request: &GenerationRequest| {
        if request.purpose != Purpose::Refine {
            return trip_responder(request);
        }
        let title = line_value(&request.user, "Task title:").unwrap_or("?");
        let child = format!("{title} / step");
        Ok(refinement_split_text(title, &[SubtaskSpec::new(&child, &[])]))
    });
    let config = PlannerConfig {
        max_refine_depth: 1,
        ..PlannerConfig::default()
    };
    let mut pipeline = Pipeline::new(OBJECTIVE, "", config).expect("pipeline");
    pipeline.run_all(&generator).expect("run");

    let graph = pipeline.graph();
    assert_eq!(generator.count(Purpose::Refine), 5);
    assert!(graph.iter().all(|node| graph.depth(node.id) <= 3));
    assert!(graph.iter().any(|node| graph.depth(node.id) == 3));
}

#[test]
fn disabled_refinement_makes_no_calls() {
    let generator = ScriptedGenerator::new(trip_responder);
    let config = PlannerConfig {
        refine: false,
        ..PlannerConfig::default()
    };
    let mut pipeline = Pipeline::new(OBJECTIVE, "", config).expect("pipeline");

    let reports = pipeline.run_all(&generator).expect("run");
    assert!(reports.contains(&PhaseReport::Refined(None)));
    assert_eq!(generator.count(Purpose::Refine), 0);
    assert!(pipeline.graph().iter().all(|node| pipeline.graph().depth(node.id) <= 2));
}

#[test]
fn sessions_run_phases_one_at_a_time() {
    let now = Instant::now();
    let mut store = SessionStore::new(Duration::from_secs(600));
    store
        .create("trip", OBJECTIVE, "", PlannerConfig::default(), now)
        .expect("create");
    let generator = ScriptedGenerator::new(trip_responder);

    for phase in Phase::RUNNABLE {
        let session = store.get_mut("trip", now).expect("session");
        session.run_phase(phase, &generator).expect("phase");
        assert_eq!(session.completed(), phase);
    }

    let session = store.get_mut("trip", now).expect("session");
    let err = session.run_phase(Phase::Executed, &generator).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SessionError>(),
        Some(SessionError::PhaseOutOfOrder(PhaseOrderError {
            completed: Phase::Executed,
            requested: Phase::Executed,
        }))
    ));
}

#[test]
fn exported_tree_reloads_and_renders() {
    let generator = ScriptedGenerator::new(trip_responder);
    let mut pipeline = Pipeline::new(OBJECTIVE, "", PlannerConfig::default()).expect("pipeline");
    pipeline.run_all(&generator).expect("run");

    let record = export_tree(pipeline.graph()).expect("export");
    assert_eq!(record.walk().len(), pipeline.graph().len());

    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("output").join("tree.json");
    write_tree(&path, &record).expect("write");
    let loaded = load_tree(&path).expect("load");
    assert_eq!(loaded, record);

    let outline = render_outline(&loaded);
    assert!(outline.starts_with(&format!("- {OBJECTIVE} [generate, done]")));
    assert!(outline.contains("depends on: Book flight"));
    assert!(outline.contains("=> Get visa done"));
}
