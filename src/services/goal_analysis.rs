//! Deterministic goal-characteristic analysis.
//!
//! Classifies a goal by keyword families and a complexity bucket, drives
//! the depth heuristic, and synthesizes the fallback strategic branches
//! used when schema generation cannot produce usable output. Everything
//! here is a pure function of the goal text, so two runs over the same
//! goal always agree.

use crate::domain::models::hta::{BranchFocus, StrategicBranch};

/// Keyword family a goal can belong to. A goal may match several.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalCategory {
    Technical,
    Creative,
    ProcessOriented,
    MasteryFocused,
    Exploratory,
}

/// Coarse complexity from goal length plus qualifier count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexityBucket {
    Low,
    Medium,
    High,
}

/// Result of analyzing a goal string.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalCharacteristics {
    pub categories: Vec<GoalCategory>,
    pub complexity: ComplexityBucket,
    /// Lowercased goal tokens, stop words removed.
    pub tokens: Vec<String>,
}

const TECHNICAL: &[&str] = &[
    "programming", "code", "coding", "software", "engineering", "algorithm", "algorithms",
    "data", "database", "system", "systems", "technical", "api", "network", "development",
];
const CREATIVE: &[&str] = &[
    "photography", "art", "design", "music", "writing", "creative", "drawing", "painting",
    "compose", "sketch", "illustration",
];
const PROCESS: &[&str] = &[
    "workflow", "process", "organize", "organization", "manage", "management", "plan",
    "planning", "routine", "habit", "productivity",
];
const MASTERY: &[&str] = &[
    "master", "mastery", "expert", "expertise", "professional", "excel", "perfect",
];
const EXPLORATORY: &[&str] = &[
    "explore", "discover", "curious", "overview", "introduction", "basics", "try", "sample",
];
const COMPLEX_QUALIFIERS: &[&str] = &[
    "advanced", "sophisticated", "comprehensive", "integrate", "analyze", "synthesize",
    "optimize",
];
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "for", "to", "in", "of", "on", "with", "my", "how", "i",
    "want", "learn", "learning", "get", "better", "at",
];

pub fn tokenize(goal: &str) -> Vec<String> {
    goal.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOP_WORDS.contains(t))
        .map(ToString::to_string)
        .collect()
}

/// Classify the goal. Always deterministic for the same input.
pub fn analyze(goal: &str) -> GoalCharacteristics {
    let tokens = tokenize(goal);

    let mut categories = Vec::new();
    let matches = |family: &[&str]| tokens.iter().any(|t| family.contains(&t.as_str()));
    if matches(TECHNICAL) {
        categories.push(GoalCategory::Technical);
    }
    if matches(CREATIVE) {
        categories.push(GoalCategory::Creative);
    }
    if matches(PROCESS) {
        categories.push(GoalCategory::ProcessOriented);
    }
    if matches(MASTERY) {
        categories.push(GoalCategory::MasteryFocused);
    }
    if matches(EXPLORATORY) {
        categories.push(GoalCategory::Exploratory);
    }

    let qualifier_count = tokens
        .iter()
        .filter(|t| COMPLEX_QUALIFIERS.contains(&t.as_str()))
        .count();
    let length_points = (tokens.len() / 6).min(3);
    let points = length_points + qualifier_count * 2;
    let complexity = match points {
        0 | 1 => ComplexityBucket::Low,
        2 | 3 => ComplexityBucket::Medium,
        _ => ComplexityBucket::High,
    };

    GoalCharacteristics {
        categories,
        complexity,
        tokens,
    }
}

/// Learner experience hint extracted from the accumulated context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperienceLevel {
    Beginner,
    Intermediate,
    Expert,
}

/// Depth heuristic: base 4, adjusted by the goal's characteristics and the
/// learner's experience, clamped to [2, 6].
pub fn max_useful_depth(
    characteristics: &GoalCharacteristics,
    experience: Option<ExperienceLevel>,
) -> u8 {
    let mut depth: i8 = 4;
    if characteristics.complexity == ComplexityBucket::High {
        depth = 6;
    }
    if characteristics.complexity == ComplexityBucket::Low
        || characteristics.categories.contains(&GoalCategory::Exploratory)
    {
        depth = depth.min(3);
    }
    if characteristics.categories.contains(&GoalCategory::Technical)
        || characteristics.categories.contains(&GoalCategory::MasteryFocused)
    {
        depth = 5;
    }
    match experience {
        Some(ExperienceLevel::Beginner) => depth += 1,
        Some(ExperienceLevel::Expert) => depth -= 1,
        _ => {}
    }
    #[allow(clippy::cast_sign_loss)]
    {
        depth.clamp(2, 6) as u8
    }
}

/// The core of the goal with mastery/exploratory framing words removed,
/// title-cased for branch names. "Master portrait photography" becomes
/// "Portrait Photography".
pub fn goal_subject(goal: &str) -> String {
    let framing: &[&str] = &[
        "master", "mastery", "learn", "learning", "explore", "understand", "improve",
        "become", "get", "better", "at", "of", "the", "a", "an", "my", "to", "in", "how",
        "want", "i", "let", "me", "us", "some", "about",
    ];
    let words: Vec<String> = goal
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !framing.contains(&t.to_lowercase().as_str()))
        .map(title_case)
        .collect();
    if words.is_empty() {
        title_case(goal.trim())
    } else {
        words.join(" ")
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// Strip a redundant goal-subject prefix from a generated branch name while
/// keeping the domain terms. "Portrait Photography Lighting Craft" under the
/// goal "Master portrait photography" becomes "Lighting Craft".
pub fn clean_branch_name(name: &str, goal: &str) -> String {
    let subject_tokens = tokenize(&goal_subject(goal));
    let name_words: Vec<&str> = name.split_whitespace().collect();

    let mut skip = 0;
    for word in &name_words {
        let lowered = word.to_lowercase();
        if subject_tokens.contains(&lowered) {
            skip += 1;
        } else {
            break;
        }
    }
    if skip == name_words.len() {
        // The whole name is the goal subject; keep it rather than emptying.
        return name.trim().to_string();
    }
    name_words[skip..].join(" ")
}

/// Deterministic fallback branches for a goal whose schema generation
/// failed. Always at least four branches with unique, goal-derived names;
/// descriptions keep the goal wording.
pub fn fallback_branches(goal: &str, characteristics: &GoalCharacteristics) -> Vec<StrategicBranch> {
    let subject = goal_subject(goal);
    let dominant = characteristics.categories.first().copied();

    let templates: &[(&str, BranchFocus)] = match dominant {
        Some(GoalCategory::Technical) => &[
            ("Core Concepts of {}", BranchFocus::Theory),
            ("{} Tooling and Environment", BranchFocus::HandsOn),
            ("Building Projects with {}", BranchFocus::Project),
            ("Debugging and Optimization in {}", BranchFocus::HandsOn),
        ],
        Some(GoalCategory::Creative) => &[
            ("{} Fundamentals", BranchFocus::Theory),
            ("Creative Techniques in {}", BranchFocus::HandsOn),
            ("{} Practice Projects", BranchFocus::Project),
            ("Developing Personal Style in {}", BranchFocus::Balanced),
        ],
        Some(GoalCategory::ProcessOriented) => &[
            ("Mapping Your {} Workflow", BranchFocus::Theory),
            ("{} Habits and Routines", BranchFocus::HandsOn),
            ("Measuring {} Outcomes", BranchFocus::Balanced),
            ("Refining the {} Process", BranchFocus::Project),
        ],
        Some(GoalCategory::MasteryFocused) => &[
            ("{} Technique Refinement", BranchFocus::HandsOn),
            ("Deliberate {} Practice", BranchFocus::HandsOn),
            ("{} Portfolio Work", BranchFocus::Project),
            ("Critique and Feedback in {}", BranchFocus::Balanced),
        ],
        Some(GoalCategory::Exploratory) | None => &[
            ("Surveying {}", BranchFocus::Theory),
            ("First Steps in {}", BranchFocus::HandsOn),
            ("{} in Everyday Practice", BranchFocus::Balanced),
            ("Finding Your Interest in {}", BranchFocus::Project),
        ],
    };

    templates
        .iter()
        .enumerate()
        .map(|(index, (template, focus))| {
            let name = template.replace("{}", &subject);
            StrategicBranch {
                description: format!("{name}, grounded in the goal: {goal}"),
                name,
                #[allow(clippy::cast_possible_truncation)]
                priority: index as u32 + 1,
                domain_focus: subject.to_lowercase(),
                rationale: "Synthesized from goal characteristics".to_string(),
                expected_outcomes: Vec::new(),
                context_adaptations: Vec::new(),
                exploration_opportunities: Vec::new(),
                focus: *focus,
            }
        })
        .collect()
}
