fn main() {
    // Necessary for ESP-IDF
    embuild::espidf::sysenv::output();
}
