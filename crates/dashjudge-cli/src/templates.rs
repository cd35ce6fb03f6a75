pub const GITIGNORE: &str = r#"# dashjudge
.dashjudge/
*.db
"#;
