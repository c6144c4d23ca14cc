pub fn print_startup_banner() {
    let year = chrono::Local::now().format("%Y").to_string();

    // ANSI color codes
    let blue = "\x1B[38;5;33m";
    let gray = "\x1B[38;5;245m";
    let bright_blue = "\x1B[94m";
    let reset = "\x1B[0m";

    println!(
        r#"
  {year} Newswire
   {blue}
            ((*)){gray}
              {blue}|{gray}        Extra! Extra!{blue}
             /|\{gray}     read all about it{blue}
            / | \
           /  |  \
          /   |   \
         /____|____\
        _/    |    \_
    ___/______|______\___
   /                     \
  (_______________________)
         {bright_blue}newswire v1.0{reset}
"#,
        year = year,
        blue = blue,
        gray = gray,
        bright_blue = bright_blue,
        reset = reset
    );
}
