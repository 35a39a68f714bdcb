fn main() {
    stockvn::cli::run();
}
