use super::{Mutation, Reply, ShellContext};

const PACKAGE_JSON: &str = "/package.json";

const USAGE: &str = "usage: npm <install|start|run|init|update|audit>";

fn package_json_template(name: &str) -> String {
    format!(
        "{{\n  \"name\": \"{name}\",\n  \"version\": \"1.0.0\",\n  \"scripts\": {{\n    \"dev\": \"lyx run src/main.ts\",\n    \"build\": \"lyx build\",\n    \"test\": \"lyx test\"\n  }}\n}}\n"
    )
}

pub(super) fn handle(args: &[&str], ctx: &ShellContext<'_>) -> Reply {
    let Some((sub, rest)) = args.split_first() else {
        return Reply::line(USAGE);
    };

    match *sub {
        "install" | "i" => {
            if rest.is_empty() {
                Reply::lines([
                    "installing dependencies from package.json...",
                    "dependencies installed",
                ])
            } else {
                Reply::lines([
                    format!("installing {}...", rest.join(" ")),
                    format!("added {} package(s)", rest.len()),
                ])
            }
        }
        "start" => Reply::lines([
            "starting development server...",
            "server running at http://localhost:3000",
        ]),
        "run" => match rest.first().copied() {
            Some("dev") => Reply::lines(["> dev", "development server started"]),
            Some("build") => Reply::lines(["> build", "build completed"]),
            Some("test") => Reply::lines(["> test", "all tests passed"]),
            Some(script) => Reply::lines([format!("> {script}"), "script finished".to_string()]),
            None => Reply::line("usage: npm run <script>"),
        },
        "init" => {
            if ctx.vfs.lookup(PACKAGE_JSON).is_some() {
                return Reply::line("package.json already exists");
            }
            let name = match ctx.vfs.root_name() {
                "" => "project",
                name => name,
            };
            Reply::lines(["initializing npm project...", "wrote /package.json"]).with_mutation(
                Mutation::CreateFile {
                    path: PACKAGE_JSON.to_string(),
                    content: package_json_template(name),
                },
            )
        }
        "update" => Reply::lines(["updating dependencies...", "dependencies up to date"]),
        "audit" => Reply::lines(["auditing dependencies...", "found 0 vulnerabilities"]),
        other => Reply::line(format!("npm: '{other}' is not recognized")),
    }
}

#[cfg(test)]
#[path = "../../../tests/unit/kernel/shell/npm.rs"]
mod tests;
