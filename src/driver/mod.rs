//! C driver generation
//!
//! Wraps the function under test in a `main` so it can be exercised from
//! the command line or explored symbolically. The executable driver
//! parses `argv` into the function's parameters with embedded helper
//! routines and silences the program's own stdout so the execution-trace
//! line printed by the instrumented IR is the only output. The symbolic
//! driver marks every parameter symbolic for the executor instead.

use crate::config::KLEE_ARRAY_SIZE;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;

/// argv-parsing helpers embedded into every executable driver
const PARSER_HELPERS: &str = r#"#include <stdio.h>
#include <stdlib.h>
#include <stdint.h>
#include <assert.h>
#include <unistd.h>
#include <limits.h>

int __drv_length(const char *str) {
    int length = 0;
    while (str[length] != '\0') {
        length++;
    }
    return length;
}

int __drv_count(const char *str) {
    int len = __drv_length(str);
    assert(len >= 2);
    if (str[0] == '[' && str[1] == ']') {
        return 0;
    }
    int count = 0;
    for (int i = 0; i < len; i++) {
        if (str[i] == ',') {
            count++;
        }
    }
    return count + 1;
}

int *__drv_parse_array(const char *str) {
    int count = __drv_count(str);
    int *array = (int *)malloc(count * sizeof(int));
    int number = 0;
    int index = 0;
    int negative = 0;
    int stop = 0;
    int len = __drv_length(str);
    for (int i = 0; i <= len; i++) {
        if (str[i] >= '0' && str[i] <= '9' && !stop) {
            if (negative) {
                if (number < INT_MIN / 10 || (number == INT_MIN / 10 && str[i] - '0' > 8)) {
                    number = INT_MIN;
                    stop = 1;
                } else {
                    number = number * 10 - (str[i] - '0');
                }
            } else {
                if (number > INT_MAX / 10 || (number == INT_MAX / 10 && str[i] - '0' > 7)) {
                    number = INT_MAX;
                    stop = 1;
                } else {
                    number = number * 10 + (str[i] - '0');
                }
            }
        } else if (str[i] == '-') {
            negative = 1;
        } else if (str[i] == ',' || str[i] == ']') {
            array[index++] = number;
            number = 0;
            negative = 0;
            stop = 0;
        }
    }
    return array;
}

uint32_t __drv_atou(const char *str) {
    uint32_t number = 0;
    int len = __drv_length(str);
    for (int i = 0; i < len; i++) {
        if (str[i] >= '0' && str[i] <= '9') {
            if (number > UINT32_MAX / 10 || (number == UINT32_MAX / 10 && str[i] - '0' > 5)) {
                number = UINT32_MAX;
                break;
            }
            number = number * 10 + (str[i] - '0');
        } else {
            break;
        }
    }
    return number;
}

char *__drv_copy(const char *str) {
    int len = __drv_length(str);
    char *ret = (char *)malloc((len + 1) * sizeof(char));
    for (int i = 0; i < len; i++) {
        ret[i] = str[i];
    }
    ret[len] = '\0';
    return ret;
}
"#;

/// One `(type, name)` parameter of the function under test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub ty: String,
    pub name: String,
}

/// Generates driver files next to the source under test
pub struct DriverGenerator {
    src_file: PathBuf,
}

impl DriverGenerator {
    pub fn new(src_file: impl Into<PathBuf>) -> Result<Self> {
        let src_file = src_file.into();
        if !src_file.exists() {
            bail!("source file {} does not exist", src_file.display());
        }
        Ok(Self { src_file })
    }

    /// Path of the executable driver this generator writes
    pub fn executable_driver_path(&self) -> PathBuf {
        self.sibling_path("_driver.c")
    }

    /// Path of the symbolic driver this generator writes
    pub fn symbolic_driver_path(&self) -> PathBuf {
        self.sibling_path("_klee_driver.c")
    }

    fn sibling_path(&self, suffix: &str) -> PathBuf {
        let stem = self
            .src_file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.src_file.with_file_name(format!("{stem}{suffix}"))
    }

    /// Rename any `main` defined in the source to `__main__`, so the
    /// driver's own `main` is the single entry point
    pub fn rename_existing_main(&self) -> Result<()> {
        let text = fs::read_to_string(&self.src_file)
            .with_context(|| format!("failed to read {}", self.src_file.display()))?;
        let mut out = Vec::new();
        for line in text.lines() {
            if line.contains("main") && line.contains('(') && !line.contains("__main__") {
                out.push(line.replacen("main", "__main__", 1));
            } else {
                out.push(line.to_string());
            }
        }
        fs::write(&self.src_file, out.join("\n") + "\n")
            .with_context(|| format!("failed to rewrite {}", self.src_file.display()))
    }

    /// Generate the executable driver for `function_name`
    pub fn generate_executable(&self, function_name: &str) -> Result<PathBuf> {
        self.rename_existing_main()?;
        let declaration = self.find_declaration(function_name)?;
        let return_type = return_type_of(&declaration, function_name);
        let parameters = parse_parameters(&declaration, function_name)?;
        check_supported(&parameters)?;

        let stem = self.src_file.file_stem().unwrap_or_default().to_string_lossy();
        let mut driver = format!("#include \"{stem}.c\"\n\n");
        driver.push_str(PARSER_HELPERS);
        driver.push('\n');
        driver.push_str("int main(int argc, char** argv) {\n");
        driver.push_str("    int stdout_fd = dup(1);\n");
        driver.push_str("    close(1);\n");

        for (idx, param) in parameters.iter().enumerate() {
            let argv = format!("argv[{}]", idx + 1);
            let init = match param.ty.as_str() {
                "int" => format!("atoi({argv})"),
                "uint32_t" => format!("__drv_atou({argv})"),
                "int*" => format!("__drv_parse_array({argv})"),
                "char*" => format!("__drv_copy({argv})"),
                "char" => format!("{argv}[0]"),
                _ => unreachable!("checked by check_supported"),
            };
            driver.push_str(&format!(
                "    {} {} = {};\n",
                spaced_type(&param.ty),
                param.name,
                init
            ));
        }

        let args: Vec<&str> = parameters.iter().map(|p| p.name.as_str()).collect();
        driver.push_str(&format!(
            "    {}retVal = {}({});\n",
            return_type,
            function_name,
            args.join(", ")
        ));
        for param in &parameters {
            if param.ty.contains('*') {
                driver.push_str(&format!("    free({});\n", param.name));
            }
        }
        if return_type.contains('*') {
            driver.push_str("    free(retVal);\n");
        }
        driver.push_str("    fflush(stdout);\n");
        driver.push_str("    dup2(stdout_fd, 1);\n");
        driver.push_str("    return 0;\n");
        driver.push_str("}\n");

        let out = self.executable_driver_path();
        fs::write(&out, driver)
            .with_context(|| format!("failed to write driver {}", out.display()))?;
        tracing::info!(driver = %out.display(), "generated executable driver");
        Ok(out)
    }

    /// Generate the symbolic driver for `function_name`
    pub fn generate_symbolic(&self, function_name: &str) -> Result<PathBuf> {
        self.rename_existing_main()?;
        let declaration = self.find_declaration(function_name)?;
        let return_type = return_type_of(&declaration, function_name);
        let parameters = parse_parameters(&declaration, function_name)?;
        check_supported(&parameters)?;

        let stem = self.src_file.file_stem().unwrap_or_default().to_string_lossy();
        let mut driver = String::from("#include <klee/klee.h>\n");
        driver.push_str(&format!("#include \"{stem}.c\"\n\n"));
        driver.push_str("int main() {\n");

        for param in &parameters {
            let name = &param.name;
            match param.ty.as_str() {
                "int" | "uint32_t" | "char" => {
                    driver.push_str(&format!("    {} {};\n", param.ty, name));
                    driver.push_str(&format!(
                        "    klee_make_symbolic(&{name}, sizeof({name}), \"{name}\");\n"
                    ));
                }
                "int*" => {
                    driver.push_str(&format!("    int {name}[{KLEE_ARRAY_SIZE}];\n"));
                    driver.push_str(&format!(
                        "    klee_make_symbolic({name}, sizeof({name}), \"{name}\");\n"
                    ));
                }
                "char*" => {
                    driver.push_str(&format!("    char {name}[{KLEE_ARRAY_SIZE}];\n"));
                    driver.push_str(&format!(
                        "    klee_make_symbolic({name}, sizeof({name}), \"{name}\");\n"
                    ));
                }
                _ => unreachable!("checked by check_supported"),
            }
        }

        let args: Vec<&str> = parameters.iter().map(|p| p.name.as_str()).collect();
        driver.push_str(&format!(
            "    {}retVal = {}({});\n",
            return_type,
            function_name,
            args.join(", ")
        ));
        if return_type.contains('*') {
            driver.push_str("    free(retVal);\n");
        }
        driver.push_str("    return 0;\n");
        driver.push_str("}\n");

        let out = self.symbolic_driver_path();
        fs::write(&out, driver)
            .with_context(|| format!("failed to write driver {}", out.display()))?;
        tracing::info!(driver = %out.display(), "generated symbolic driver");
        Ok(out)
    }

    /// First line that mentions the function name and opens its body
    fn find_declaration(&self, function_name: &str) -> Result<String> {
        let text = fs::read_to_string(&self.src_file)
            .with_context(|| format!("failed to read {}", self.src_file.display()))?;
        text.lines()
            .find(|line| line.contains(function_name) && line.contains('{'))
            .map(|line| line.to_string())
            .with_context(|| {
                format!(
                    "no declaration of {} found in {}",
                    function_name,
                    self.src_file.display()
                )
            })
    }
}

/// The declaration text ahead of the function name, e.g. `int ` or `int *`
fn return_type_of(declaration: &str, function_name: &str) -> String {
    match declaration.find(function_name) {
        Some(pos) => declaration[..pos].to_string(),
        None => String::new(),
    }
}

/// Render a compacted type for a local declaration (`int*` -> `int *`)
fn spaced_type(ty: &str) -> String {
    match ty.strip_suffix('*') {
        Some(base) => format!("{base} *"),
        None => ty.to_string(),
    }
}

/// Split a declaration's parameter list into `(type, name)` pairs
///
/// The boundary between type and name is the last blank or `*` in each
/// comma-separated fragment; spaces inside the type are dropped, so
/// `int *xs` yields `("int*", "xs")`.
pub fn parse_parameters(declaration: &str, function_name: &str) -> Result<Vec<Parameter>> {
    let start = declaration
        .find(function_name)
        .context("function name not in declaration")?;
    let open = declaration[start..]
        .find('(')
        .map(|p| start + p)
        .context("no parameter list in declaration")?;
    let close = declaration[open..]
        .find(')')
        .map(|p| open + p)
        .context("unterminated parameter list in declaration")?;

    let list = &declaration[open + 1..close];
    let mut parameters = Vec::new();
    for fragment in list.split(',') {
        let fragment = fragment.trim();
        if fragment.is_empty() || fragment == "void" {
            continue;
        }
        let boundary = fragment
            .rfind(|c: char| c == ' ' || c == '*')
            .with_context(|| format!("cannot split parameter '{fragment}'"))?;
        let ty: String = fragment[..=boundary].chars().filter(|c| *c != ' ').collect();
        let name = fragment[boundary + 1..].trim().to_string();
        parameters.push(Parameter { ty, name });
    }
    Ok(parameters)
}

fn check_supported(parameters: &[Parameter]) -> Result<()> {
    for param in parameters {
        match param.ty.as_str() {
            "int" | "uint32_t" | "int*" | "char*" | "char" => {}
            other => bail!("unsupported parameter type: {} {}", other, param.name),
        }
    }
    Ok(())
}
