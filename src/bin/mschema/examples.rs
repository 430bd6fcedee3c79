//! Example command groups rendered into `--help` output.

/// A titled group of example invocations.
pub struct ExampleGroup {
    pub title: &'static str,
    pub commands: &'static [&'static str],
}

/// Examples attached to a top-level subcommand.
pub struct CommandExamples {
    pub name: &'static str,
    pub groups: &'static [ExampleGroup],
}

pub fn command_examples() -> &'static [CommandExamples] {
    &[
        CommandExamples {
            name: "analyze",
            groups: &[ExampleGroup {
                title: "Infer a schema from live data",
                commands: &[
                    "mschema analyze --collection users",
                    "mschema analyze --collection users --sample 50000 --save schemas/users.yml",
                    "mschema analyze --collection users --store",
                ],
            }],
        },
        CommandExamples {
            name: "schema",
            groups: &[
                ExampleGroup {
                    title: "Compare schema versions",
                    commands: &["mschema schema diff --from schemas/users_v1.yml --to schemas/users_v2.yml"],
                },
                ExampleGroup {
                    title: "Index advice",
                    commands: &["mschema schema recommend-indexes --schema schemas/users.yml --collection users"],
                },
            ],
        },
        CommandExamples {
            name: "drift",
            groups: &[
                ExampleGroup {
                    title: "One-shot drift check (exits 1 on drift)",
                    commands: &["mschema drift detect --schema schemas/users.yml --collection users"],
                },
                ExampleGroup {
                    title: "Continuous monitoring",
                    commands: &[
                        "mschema drift monitor --schema schemas/users.yml --collection users --interval 300",
                    ],
                },
            ],
        },
        CommandExamples {
            name: "migrate",
            groups: &[
                ExampleGroup {
                    title: "Plan a migration",
                    commands: &[
                        "mschema migrate plan --from schemas/users_v1.yml --to schemas/users_v2.yml --out plan.json",
                    ],
                },
                ExampleGroup {
                    title: "Apply a plan",
                    commands: &[
                        "mschema migrate apply --plan plan.json --to schemas/users_v2.yml --collection users --dry-run",
                        "mschema migrate apply --plan plan.json --to schemas/users_v2.yml --collection users --resume-from 665f1c2ab1e4c3a1f0a1b2c3",
                    ],
                },
            ],
        },
        CommandExamples {
            name: "validate",
            groups: &[
                ExampleGroup {
                    title: "Check live documents against a schema",
                    commands: &["mschema validate test --schema schemas/users.yml --collection users"],
                },
                ExampleGroup {
                    title: "Install the engine validator",
                    commands: &[
                        "mschema validate apply --schema schemas/users.yml --collection users --level moderate --action warn",
                    ],
                },
            ],
        },
    ]
}
